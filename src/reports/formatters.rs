use crate::error::LineageError;
use crate::reports::generator::LineageReport;
use crate::types::LineageNode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// D3 tree page shipped with the crate
pub const DEFAULT_TREE_TEMPLATE: &str = include_str!("../../templates/tree_template.html");

const TITLE_PLACEHOLDER: &str = "<title>LookML Tree</title>";
const DATA_PLACEHOLDER: &str = "treeData.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
    Html,
}

impl FromStr for OutputFormat {
    type Err = LineageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            other => Err(LineageError::InvalidConfig(format!(
                "unsupported output format '{}'",
                other
            ))),
        }
    }
}

/// Trait for report formatters
pub trait ReportFormatter {
    /// Write this format's files under `output_dir`, returning their paths
    fn write(&self, report: &LineageReport, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Flat tables, one CSV per row type
pub struct CsvFormatter;

impl CsvFormatter {
    fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("Failed to write row to {:?}", path))?;
        }
        writer.flush()?;
        debug!("Wrote {} rows to {:?}", rows.len(), path);
        Ok(())
    }
}

impl ReportFormatter for CsvFormatter {
    fn write(&self, report: &LineageReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let tables = [
            "views.csv",
            "explores.csv",
            "explore_derived_views.csv",
            "view_includes.csv",
            "model_includes.csv",
            "diagnostics.csv",
        ];
        let paths: Vec<PathBuf> = tables.iter().map(|name| output_dir.join(name)).collect();

        Self::write_table(&paths[0], &report.views)?;
        Self::write_table(&paths[1], &report.explores)?;
        Self::write_table(&paths[2], &report.explore_derived_views)?;
        Self::write_table(&paths[3], &report.view_includes)?;
        Self::write_table(&paths[4], &report.model_includes)?;
        Self::write_table(&paths[5], &report.diagnostics)?;

        Ok(paths)
    }
}

/// Per-root tree JSON in the shape the D3 page loads: a one-element array
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn render(tree: &LineageNode) -> Result<String> {
        Ok(serde_json::to_string_pretty(&[tree])?)
    }
}

impl ReportFormatter for JsonFormatter {
    fn write(&self, report: &LineageReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let trees_dir = output_dir.join("trees");
        fs::create_dir_all(&trees_dir)
            .with_context(|| format!("Failed to create {:?}", trees_dir))?;

        let mut paths = Vec::new();
        for (root, tree) in &report.trees {
            let path = trees_dir.join(format!("{}.json", file_stem(root)));
            fs::write(&path, Self::render(tree)?)
                .with_context(|| format!("Failed to write {:?}", path))?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// One HTML page per root, pointing at that root's JSON
pub struct HtmlFormatter {
    template: String,
}

impl HtmlFormatter {
    pub fn new(template: impl Into<String>) -> crate::error::Result<Self> {
        let template = template.into();
        if !template.contains(DATA_PLACEHOLDER) {
            return Err(LineageError::Template(format!(
                "template does not reference {}",
                DATA_PLACEHOLDER
            )));
        }
        Ok(Self { template })
    }

    pub fn render(&self, root: &str) -> String {
        let stem = file_stem(root);
        self.template
            .replace(TITLE_PLACEHOLDER, &format!("<title>LookML Tree: {}</title>", root))
            .replace(DATA_PLACEHOLDER, &format!("{}.json", stem))
    }
}

impl Default for HtmlFormatter {
    fn default() -> Self {
        Self {
            template: DEFAULT_TREE_TEMPLATE.to_string(),
        }
    }
}

impl ReportFormatter for HtmlFormatter {
    fn write(&self, report: &LineageReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let trees_dir = output_dir.join("trees");
        fs::create_dir_all(&trees_dir)
            .with_context(|| format!("Failed to create {:?}", trees_dir))?;

        let mut paths = Vec::new();
        for (root, _) in &report.trees {
            let path = trees_dir.join(format!("{}.html", file_stem(root)));
            fs::write(&path, self.render(root))
                .with_context(|| format!("Failed to write {:?}", path))?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Root name made safe for use as a file name
pub fn file_stem(root: &str) -> String {
    root.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write `summary.json` plus every requested format
pub fn write_report(
    report: &LineageReport,
    output_dir: &Path,
    formats: &[OutputFormat],
    html: &HtmlFormatter,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;

    let summary_path = output_dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&report.summary)?)
        .with_context(|| format!("Failed to write {:?}", summary_path))?;
    let mut written = vec![summary_path];

    for format in formats {
        let paths = match format {
            OutputFormat::Csv => CsvFormatter.write(report, output_dir)?,
            OutputFormat::Json => JsonFormatter.write(report, output_dir)?,
            OutputFormat::Html => html.write(report, output_dir)?,
        };
        written.extend(paths);
    }

    info!("Wrote {} files to {:?}", written.len(), output_dir);
    Ok(written)
}
