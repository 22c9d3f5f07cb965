use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookml_lineage::{
    artifacts::{discovery::count_kind, ArtifactParser, ProjectDiscovery},
    config::Config,
    diagnostics::count_by_code,
    lineage::{CyclePolicy, GraphTraversal, LineageAnalyzer, LineageGraph},
    reports::{write_report, HtmlFormatter, JsonFormatter, OutputFormat, ReportGenerator},
    types::FileKind,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lookml-lineage")]
#[command(about = "Lineage trees for LookML views and explores")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    project_path: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the graph, resolve every root and write the outputs
    Analyze {
        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output formats (csv, json, html)
        #[arg(short, long, value_delimiter = ',')]
        formats: Vec<OutputFormat>,

        /// Cycle policy (node-repeat, edge-closure)
        #[arg(long)]
        cycle_policy: Option<CyclePolicy>,

        /// Resolve only these roots instead of the endpoint explores
        #[arg(short, long)]
        root: Vec<String>,

        /// Resolve these roots in addition to the endpoint explores
        #[arg(long)]
        extra_root: Vec<String>,

        /// Search subdirectories of the project path
        #[arg(long)]
        recursive: bool,
    },

    /// Print one lineage tree as JSON
    Tree {
        /// Explore or view to resolve
        root: String,

        /// Cycle policy (node-repeat, edge-closure)
        #[arg(long)]
        cycle_policy: Option<CyclePolicy>,
    },

    /// List views, explores and diagnostic counts
    List,

    /// Initialize configuration file
    Init {
        /// Configuration file path
        #[arg(short, long, default_value = "lookml-lineage.yml")]
        config_file: PathBuf,
    },

    /// Check that the project has LookML files and report diagnostics
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(&cli.log_level)?;

    info!("Starting lookml-lineage");

    match cli.command {
        Commands::Init { config_file } => {
            init_config(config_file).await?;
        }

        command => {
            let config = load_config(cli.config.as_ref()).await?;
            run(command, &cli.project_path, config).await?;
        }
    }

    Ok(())
}

async fn run(command: Commands, project_path: &Path, mut config: Config) -> Result<()> {
    match command {
        Commands::Analyze {
            output_dir,
            formats,
            cycle_policy,
            root,
            extra_root,
            recursive,
        } => {
            if let Some(output_dir) = output_dir {
                config.output.output_dir = output_dir;
            }
            if !formats.is_empty() {
                config.output.formats = formats;
            }
            if let Some(policy) = cycle_policy {
                config.lineage.cycle_policy = policy;
            }
            config.lineage.extra_roots.extend(extra_root);
            config.discovery.recursive |= recursive;
            config.validate()?;

            analyze(project_path, &config, root).await
        }

        Commands::Tree { root, cycle_policy } => {
            let graph = build_graph(project_path, &config).await?;
            let policy = cycle_policy.unwrap_or(config.lineage.cycle_policy);
            let tree = GraphTraversal::new(&graph, policy)
                .resolve_named(&root)
                .with_context(|| format!("Failed to resolve lineage for '{}'", root))?;
            println!("{}", JsonFormatter::render(&tree)?);
            Ok(())
        }

        Commands::List => list(project_path, &config).await,

        Commands::Validate => validate_project(project_path, &config).await,

        Commands::Init { config_file } => init_config(config_file).await,
    }
}

/// Initialize tracing with the specified log level
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to create env filter")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}

/// Load configuration from file or defaults, then apply environment overrides
async fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) if path.exists() => {
            info!("Loading configuration from: {:?}", path);
            Config::load_from_file(path).await?
        }
        Some(path) => {
            warn!("Configuration file not found: {:?}. Using defaults.", path);
            Config::default()
        }
        None => Config::default(),
    };

    config
        .apply_process_env()
        .context("Invalid LOOKML_LINEAGE_* environment variable")?;
    config.validate()?;

    Ok(config)
}

/// Discover, read and extract the project, then build its graph
async fn build_graph(project_path: &Path, config: &Config) -> Result<LineageGraph> {
    let files = ProjectDiscovery::new(project_path)
        .recursive(config.discovery.recursive)
        .exclude(&config.discovery.exclude)?
        .discover_files()?;

    if files.is_empty() {
        warn!("No LookML files found in {:?}", project_path);
    }

    let declarations = ArtifactParser::new()
        .load_declarations(&files)
        .await
        .context("Failed to load LookML files")?;

    Ok(LineageAnalyzer::new().build_dependency_graph(declarations))
}

async fn analyze(project_path: &Path, config: &Config, only_roots: Vec<String>) -> Result<()> {
    info!("Analyzing LookML project at {:?}", project_path);

    let graph = build_graph(project_path, config).await?;

    let report = ReportGenerator::new(config.lineage.cycle_policy)
        .with_extra_roots(config.lineage.extra_roots.clone())
        .with_only_roots(only_roots)
        .generate(&graph)
        .context("Failed to resolve lineage")?;

    let html = match &config.output.template_path {
        Some(path) => {
            let template = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read template {:?}", path))?;
            HtmlFormatter::new(template)?
        }
        None => HtmlFormatter::default(),
    };

    let written = write_report(&report, &config.output.output_dir, &config.output.formats, &html)?;

    let stats = &report.summary.statistics;
    println!("Lineage analysis complete");
    println!("  Views: {}", stats.views);
    println!("  Explores: {} ({} endpoints)", stats.explores, stats.endpoint_explores);
    println!("  Origins: {}", stats.origins);
    println!("  Trees: {}", report.trees.len());
    println!("  Diagnostics: {}", report.diagnostics.len());
    println!("  Files written: {} in {:?}", written.len(), config.output.output_dir);

    Ok(())
}

async fn list(project_path: &Path, config: &Config) -> Result<()> {
    let graph = build_graph(project_path, config).await?;

    println!("Views:");
    for index in graph.views() {
        let source = graph
            .declaration(index)
            .map(|d| d.source_type().as_str())
            .unwrap_or("unknown");
        println!("  {} ({})", graph.key(index).name, source);
    }

    println!("Explores:");
    for index in graph.explores() {
        let marker = if graph.is_endpoint(index) { " [endpoint]" } else { "" };
        println!("  {}{}", graph.key(index).name, marker);
    }

    print_diagnostic_counts(&graph);
    Ok(())
}

fn print_diagnostic_counts(graph: &LineageGraph) {
    let counts = count_by_code(&graph.diagnostics());
    if counts.is_empty() {
        println!("Diagnostics: none");
        return;
    }

    println!("Diagnostics:");
    for (code, count) in counts {
        println!("  {}: {}", code, count);
    }
}

/// Initialize configuration file
async fn init_config(config_file: PathBuf) -> Result<()> {
    info!("Initializing configuration file: {:?}", config_file);

    if config_file.exists() {
        warn!("Configuration file already exists: {:?}", config_file);
        print!("Overwrite existing file? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            info!("Configuration initialization cancelled");
            return Ok(());
        }
    }

    Config::default()
        .save_to_file(&config_file)
        .await
        .with_context(|| format!("Failed to write configuration file: {:?}", config_file))?;

    info!("Configuration file created successfully: {:?}", config_file);
    println!("Configuration file created: {:?}", config_file);
    println!("Edit this file to customize discovery, lineage and output settings.");

    Ok(())
}

/// Validate LookML project structure
async fn validate_project(project_path: &Path, config: &Config) -> Result<()> {
    info!("Validating LookML project at: {:?}", project_path);

    let files = ProjectDiscovery::new(project_path)
        .recursive(config.discovery.recursive)
        .exclude(&config.discovery.exclude)?
        .discover_files()?;

    if files.is_empty() {
        error!("❌ No .view.lkml or .model.lkml files found in {:?}", project_path);
        std::process::exit(1);
    }

    println!("✅ {} view files found", count_kind(&files, FileKind::ViewFile));
    println!("✅ {} model files found", count_kind(&files, FileKind::ModelFile));

    let graph = build_graph(project_path, config).await?;
    let stats = graph.get_statistics();
    println!(
        "✅ {} views and {} explores declared ({} endpoints)",
        stats.views, stats.explores, stats.endpoint_explores
    );

    print_diagnostic_counts(&graph);
    Ok(())
}
