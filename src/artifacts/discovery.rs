use crate::types::FileKind;
use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A LookML file found under the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookmlFile {
    pub path: PathBuf,
    /// Path relative to the project root, `/`-separated
    pub location: String,
    pub kind: FileKind,
}

/// Finds `*.view.lkml` and `*.model.lkml` files under a project directory
#[derive(Debug, Clone)]
pub struct ProjectDiscovery {
    project_path: PathBuf,
    recursive: bool,
    exclude: Vec<Pattern>,
}

impl ProjectDiscovery {
    pub fn new<P: AsRef<Path>>(project_path: P) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
            recursive: false,
            exclude: Vec::new(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Skip files whose relative location matches any of these globs
    pub fn exclude(mut self, patterns: &[String]) -> Result<Self> {
        for pattern in patterns {
            let compiled = Pattern::new(pattern)
                .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
            self.exclude.push(compiled);
        }
        Ok(self)
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Classified LookML files, sorted by location
    pub fn discover_files(&self) -> Result<Vec<LookmlFile>> {
        if !self.project_path.is_dir() {
            bail!(
                "Project path {:?} does not exist or is not a directory",
                self.project_path
            );
        }

        info!(
            "Discovering LookML files in {:?} (recursive: {})",
            self.project_path, self.recursive
        );

        let candidates = if self.recursive {
            self.walk_candidates()
        } else {
            self.glob_candidates()?
        };

        let mut files: Vec<LookmlFile> = candidates
            .into_iter()
            .filter_map(|path| self.classify(path))
            .collect();
        files.sort_by(|a, b| a.location.cmp(&b.location));

        info!(
            "Discovered {} view files and {} model files",
            count_kind(&files, FileKind::ViewFile),
            count_kind(&files, FileKind::ModelFile)
        );

        Ok(files)
    }

    fn glob_candidates(&self) -> Result<Vec<PathBuf>> {
        let root = Pattern::escape(&self.project_path.to_string_lossy());
        let pattern = format!("{}/*.lkml", root.trim_end_matches('/'));
        debug!("Globbing {}", pattern);

        let mut paths = Vec::new();
        for entry in glob::glob(&pattern).context("Failed to build discovery glob")? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }
        Ok(paths)
    }

    fn walk_candidates(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.project_path)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn classify(&self, path: PathBuf) -> Option<LookmlFile> {
        let file_name = path.file_name()?.to_string_lossy().to_string();
        let kind = FileKind::from_file_name(&file_name)?;

        let relative = path.strip_prefix(&self.project_path).unwrap_or(&path);
        let location = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if self.exclude.iter().any(|pattern| pattern.matches(&location)) {
            debug!("Excluding {}", location);
            return None;
        }

        Some(LookmlFile {
            path,
            location,
            kind,
        })
    }
}

pub fn count_kind(files: &[LookmlFile], kind: FileKind) -> usize {
    files.iter().filter(|file| file.kind == kind).count()
}
