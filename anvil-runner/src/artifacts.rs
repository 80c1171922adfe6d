//! Artifact archival
//!
//! Archives files produced by a run. Patterns are globs relative to the
//! run workspace; matched files are copied into the archive directory,
//! keyed by pipeline and run, optionally with a SHA-256 fingerprint.
//! Only files that resolve inside the workspace are archived.

use anvil_core::domain::run::ArchivedArtifact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the fingerprint manifest written at the root of a run directory
pub const FINGERPRINT_MANIFEST: &str = "fingerprints.json";

/// Subdirectory of a run directory holding the copied files
pub const FILES_DIR: &str = "files";

/// What to archive
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub pipeline: String,
    pub run_id: Uuid,
    pub workspace: PathBuf,
    pub pattern: String,
    pub fingerprint: bool,
}

/// Result of an archival attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(Vec<ArchivedArtifact>),
    /// The pattern matched no files
    NothingMatched,
}

/// Destination for run artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, request: &ArchiveRequest) -> Result<StoreOutcome>;
}

/// Stores artifacts on the local filesystem
///
/// Layout:
/// - `<archive_dir>/<pipeline>/<run id>/files/<path relative to workspace>`
/// - `<archive_dir>/<pipeline>/<run id>/fingerprints.json`
///
/// Copying and hashing run on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    archive_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(archive_dir: PathBuf) -> Self {
        Self { archive_dir }
    }

    /// Directory holding the artifacts of one run
    pub fn run_dir(&self, pipeline: &str, run_id: Uuid) -> PathBuf {
        self.archive_dir
            .join(directory_name(pipeline))
            .join(run_id.to_string())
    }

    /// Directory holding the copied files of one run
    pub fn files_dir(&self, pipeline: &str, run_id: Uuid) -> PathBuf {
        self.run_dir(pipeline, run_id).join(FILES_DIR)
    }

    fn store_blocking(&self, request: &ArchiveRequest) -> Result<StoreOutcome> {
        let matches = resolve_matches(&request.workspace, &request.pattern)?;
        if matches.is_empty() {
            debug!("No files match pattern '{}'", request.pattern);
            return Ok(StoreOutcome::NothingMatched);
        }

        let run_dir = self.run_dir(&request.pipeline, request.run_id);
        let files_dir = run_dir.join(FILES_DIR);
        let mut artifacts = Vec::with_capacity(matches.len());
        let mut manifest = BTreeMap::new();

        for source in matches {
            let relative = source
                .strip_prefix(&request.workspace)
                .with_context(|| format!("{} is outside the workspace", source.display()))?;
            let destination = files_dir.join(relative);

            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let size = fs::copy(&source, &destination).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;

            let relative = relative.to_string_lossy().to_string();
            let sha256 = if request.fingerprint {
                let hash = fingerprint_file(&destination)?;
                manifest.insert(relative.clone(), hash.clone());
                Some(hash)
            } else {
                None
            };

            info!("Archived {} ({} bytes)", relative, size);
            artifacts.push(ArchivedArtifact {
                path: relative,
                stored_at: destination,
                size,
                sha256,
            });
        }

        if request.fingerprint {
            let manifest_path = run_dir.join(FINGERPRINT_MANIFEST);
            let json = serde_json::to_string_pretty(&manifest)?;
            fs::write(&manifest_path, json)
                .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
        }

        Ok(StoreOutcome::Stored(artifacts))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, request: &ArchiveRequest) -> Result<StoreOutcome> {
        let store = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || store.store_blocking(&request))
            .await
            .context("Archival task panicked")?
    }
}

/// Expands a workspace-relative glob into the matching files
///
/// Matches that resolve outside the workspace through a symlink are skipped.
fn resolve_matches(workspace: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let relative = Path::new(pattern);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        anyhow::bail!(
            "Artifact pattern '{}' must stay inside the workspace",
            pattern
        );
    }

    let root = fs::canonicalize(workspace)
        .with_context(|| format!("Failed to resolve workspace {}", workspace.display()))?;
    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&workspace.to_string_lossy()),
        pattern
    );

    let mut entries = Vec::new();
    for entry in glob::glob(&full_pattern)
        .with_context(|| format!("Invalid glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
    {
        match fs::canonicalize(&entry) {
            Ok(target) if target.starts_with(&root) => entries.push(entry),
            Ok(target) => warn!(
                "Not archiving {}: it resolves to {} outside the workspace",
                entry.display(),
                target.display()
            ),
            Err(e) => warn!("Not archiving {}: {}", entry.display(), e),
        }
    }
    entries.sort();

    Ok(entries)
}

/// Hex-encoded SHA-256 of a file's contents
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Maps a pipeline name onto a single safe path component
fn directory_name(pipeline: &str) -> String {
    let name: String = pipeline
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    match name.trim_matches('.') {
        "" => "pipeline".to_string(),
        trimmed => trimmed.to_string(),
    }
}
