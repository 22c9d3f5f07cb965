/// Configuration management for lookml-lineage
use crate::error::LineageError;
use crate::lineage::CyclePolicy;
use crate::reports::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "LOOKML_LINEAGE_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoverySettings,
    pub lineage: LineageSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Descend into subdirectories of the project path
    pub recursive: bool,
    /// Glob patterns over project-relative paths to skip
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageSettings {
    pub cycle_policy: CyclePolicy,
    /// Explores or views resolved as roots alongside the endpoint explores
    pub extra_roots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    pub formats: Vec<OutputFormat>,
    /// HTML template replacing the built-in D3 page
    pub template_path: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("lineage_output"),
            formats: vec![OutputFormat::Csv, OutputFormat::Json, OutputFormat::Html],
            template_path: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Override settings from `LOOKML_LINEAGE_*` environment variables
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override settings from a variable lookup. Every variable present
    /// replaces the current value, lists included.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(recursive) = var("RECURSIVE") {
            self.discovery.recursive = recursive
                .parse()
                .with_context(|| format!("Invalid {}RECURSIVE: {}", ENV_PREFIX, recursive))?;
        }

        if let Some(exclude) = var("EXCLUDE") {
            self.discovery.exclude = split_list(&exclude);
        }

        if let Some(policy) = var("CYCLE_POLICY") {
            self.lineage.cycle_policy = policy.parse()?;
        }

        if let Some(roots) = var("EXTRA_ROOTS") {
            self.lineage.extra_roots = split_list(&roots);
        }

        if let Some(output_dir) = var("OUTPUT_DIR") {
            self.output.output_dir = PathBuf::from(output_dir);
        }

        if let Some(formats) = var("FORMATS") {
            self.output.formats = split_list(&formats)
                .iter()
                .map(|format| format.parse::<OutputFormat>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }

        if let Some(template) = var("TEMPLATE") {
            self.output.template_path = Some(PathBuf::from(template));
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.discovery.exclude {
            glob::Pattern::new(pattern).map_err(|e| {
                LineageError::InvalidConfig(format!("invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }

        if self.lineage.extra_roots.iter().any(|root| root.trim().is_empty()) {
            return Err(LineageError::InvalidConfig("extra roots must not be empty".into()).into());
        }

        if self.output.output_dir.as_os_str().is_empty() {
            return Err(LineageError::InvalidConfig("output directory must be set".into()).into());
        }

        if self.output.formats.is_empty() {
            return Err(LineageError::InvalidConfig("at least one output format is required".into()).into());
        }

        if let Some(template) = &self.output.template_path {
            if !template.is_file() {
                return Err(LineageError::InvalidConfig(format!(
                    "template {:?} does not exist",
                    template
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_config_save_and_load() {
        let mut config = Config::default();
        config.lineage.cycle_policy = CyclePolicy::EdgeClosure;
        config.lineage.extra_roots = vec!["report_systems".to_string()];
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).await.unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config, loaded_config);
    }

    #[tokio::test]
    async fn test_partial_yaml_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "lineage:\n  cycle_policy: edge-closure\n").unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.lineage.cycle_policy, CyclePolicy::EdgeClosure);
        assert_eq!(config.output, OutputSettings::default());
        assert!(!config.discovery.recursive);
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("RECURSIVE", "true"),
            ("EXCLUDE", "tests/**, scratch/*"),
            ("CYCLE_POLICY", "edge-closure"),
            ("EXTRA_ROOTS", "report_systems"),
            ("OUTPUT_DIR", "out"),
            ("FORMATS", "json,html"),
        ]);

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).cloned()).unwrap();

        assert!(config.discovery.recursive);
        assert_eq!(config.discovery.exclude, vec!["tests/**", "scratch/*"]);
        assert_eq!(config.lineage.cycle_policy, CyclePolicy::EdgeClosure);
        assert_eq!(config.lineage.extra_roots, vec!["report_systems"]);
        assert_eq!(config.output.output_dir, PathBuf::from("out"));
        assert_eq!(config.output.formats, vec![OutputFormat::Json, OutputFormat::Html]);
    }

    #[test]
    fn test_invalid_env_values() {
        let vars = env(&[("CYCLE_POLICY", "sideways")]);
        assert!(Config::default().apply_env(|key| vars.get(key).cloned()).is_err());

        let vars = env(&[("RECURSIVE", "maybe")]);
        assert!(Config::default().apply_env(|key| vars.get(key).cloned()).is_err());

        let vars = env(&[("FORMATS", "csv,pdf")]);
        assert!(Config::default().apply_env(|key| vars.get(key).cloned()).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.output.formats.clear();
        assert!(config.validate().is_err());

        config = Config::default();
        config.discovery.exclude = vec!["[".to_string()];
        assert!(config.validate().is_err());

        config = Config::default();
        config.output.template_path = Some(PathBuf::from("/no/such/template.html"));
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_env_overrides_file_values() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "discovery:\n  recursive: true\n  exclude: [\"old/**\"]\nlineage:\n  cycle_policy: edge-closure\n  extra_roots: [a, b]\n",
        )
        .unwrap();
        let mut config = Config::load_from_file(temp_file.path()).await.unwrap();

        // Values equal to the defaults still win over the file.
        let vars = env(&[
            ("RECURSIVE", "false"),
            ("EXCLUDE", "new/**"),
            ("CYCLE_POLICY", "node-repeat"),
            ("EXTRA_ROOTS", "c"),
        ]);
        config.apply_env(|key| vars.get(key).cloned()).unwrap();

        assert!(!config.discovery.recursive);
        assert_eq!(config.discovery.exclude, vec!["new/**"]);
        assert_eq!(config.lineage.cycle_policy, CyclePolicy::NodeRepeat);
        assert_eq!(config.lineage.extra_roots, vec!["c"]);
        assert_eq!(config.output, OutputSettings::default());
    }

    #[tokio::test]
    async fn test_absent_env_keeps_file_values() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "lineage:\n  cycle_policy: edge-closure\n").unwrap();
        let mut config = Config::load_from_file(temp_file.path()).await.unwrap();

        config.apply_env(|_| None).unwrap();
        assert_eq!(config.lineage.cycle_policy, CyclePolicy::EdgeClosure);
    }
}
