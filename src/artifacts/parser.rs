use crate::artifacts::discovery::LookmlFile;
use crate::error::LineageError;
use crate::extract::extract_declarations;
use crate::types::Declaration;
use anyhow::{Context, Result};
use futures::future::try_join_all;
use tracing::{debug, info, instrument};

/// Reads discovered files and extracts their declarations
#[derive(Debug, Clone, Default)]
pub struct ArtifactParser;

/// Declarations extracted from one file
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: LookmlFile,
    pub declarations: Vec<Declaration>,
}

impl ArtifactParser {
    pub fn new() -> Self {
        Self
    }

    /// Read and extract every file concurrently. Results come back in the
    /// order of `files`, whatever order the reads finish in.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn parse_files(&self, files: &[LookmlFile]) -> Result<Vec<ParsedFile>> {
        let tasks = files.iter().cloned().map(Self::parse_file);
        let parsed = try_join_all(tasks).await?;

        info!(
            "Extracted {} declarations from {} files",
            parsed.iter().map(|p| p.declarations.len()).sum::<usize>(),
            parsed.len()
        );
        Ok(parsed)
    }

    /// All declarations, merged in file-location order
    pub async fn load_declarations(&self, files: &[LookmlFile]) -> Result<Vec<Declaration>> {
        let mut files = files.to_vec();
        files.sort_by(|a, b| a.location.cmp(&b.location));

        Ok(self
            .parse_files(&files)
            .await?
            .into_iter()
            .flat_map(|parsed| parsed.declarations)
            .collect())
    }

    async fn parse_file(file: LookmlFile) -> Result<ParsedFile> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|source| LineageError::UnreadableFile {
                path: file.path.clone(),
                source,
            })
            .with_context(|| format!("Failed to read {}", file.location))?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let location = file.location.clone();
        let kind = file.kind;

        let declarations =
            tokio::task::spawn_blocking(move || extract_declarations(&text, &location, kind))
                .await
                .with_context(|| format!("Extraction task for {} panicked", file.location))?;

        debug!("{}: {} declarations", file.location, declarations.len());
        Ok(ParsedFile { file, declarations })
    }
}
