//! Media staging: uploaded and generated binary artifacts.
//!
//! Artifacts are written as `<uuid><ext>` into one flat directory and
//! addressed by the URL `<url_prefix>/<file_name>`, which is what rows store.
//! Names are globally unique so concurrent writers never collide. Removal is
//! best-effort and treats an already-missing file as success.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::GatewayResult;

/// A file written into the staging directory.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    pub fn new(config: &MediaConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Writes `bytes` under a fresh name. `ext` includes the dot (`".wav"`)
    /// or is empty.
    pub async fn stage(&self, bytes: &[u8], ext: &str) -> GatewayResult<StagedArtifact> {
        self.stage_named("", bytes, ext).await
    }

    /// Like [`stage`](Self::stage) with a fixed name prefix, e.g. `doc_`.
    pub async fn stage_named(
        &self,
        prefix: &str,
        bytes: &[u8],
        ext: &str,
    ) -> GatewayResult<StagedArtifact> {
        let file_name = format!("{}{}{}", prefix, Uuid::new_v4(), sanitize_ext(ext));
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;
        debug!(file = %file_name, bytes = bytes.len(), "staged artifact");
        Ok(StagedArtifact {
            url: format!("{}/{}", self.url_prefix, file_name),
            file_name,
            path,
        })
    }

    /// Maps a stored URL back to its file, refusing anything outside the
    /// staging directory.
    pub fn resolve_url(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        if rest.is_empty() || rest.contains('/') || rest.contains('\\') || rest.starts_with('.') {
            return None;
        }
        Some(self.dir.join(rest))
    }

    /// Deletes the artifact behind `url`. Never fails.
    pub async fn remove_url(&self, url: &str) {
        let Some(path) = self.resolve_url(url) else {
            warn!(url, "not a staged media url, skipping removal");
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(url, "removed artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(url, "could not remove artifact: {}", e),
        }
    }
}

/// Keeps an extension only if it is a short alphanumeric suffix.
fn sanitize_ext(ext: &str) -> String {
    let trimmed = ext.trim_start_matches('.');
    if trimmed.is_empty()
        || trimmed.len() > 10
        || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return String::new();
    }
    format!(".{}", trimmed.to_ascii_lowercase())
}
