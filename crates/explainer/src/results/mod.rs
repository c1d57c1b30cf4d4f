//! Durable per-slide artifacts, stored as `outputs/<uid>.json`.
//!
//! An artifact is a JSON array of strings, one per slide, in slide order.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            output_dir: data_directory.as_ref().join("outputs"),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_dir
    }

    /// The reference stored on a completed job for `uid`.
    pub fn result_ref(uid: &str) -> String {
        format!("{}.json", uid)
    }

    pub fn path_for_ref(&self, result_ref: &str) -> PathBuf {
        self.output_dir.join(result_ref)
    }

    /// Persists `texts` for `uid`, replacing any earlier artifact.
    ///
    /// Written to a temp file and renamed, so readers see either the old
    /// artifact or the complete new one. Returns the reference to record on
    /// the job.
    pub async fn write(&self, uid: &str, texts: &[String]) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: self.output_dir.clone(),
                source: e,
            })?;

        let result_ref = Self::result_ref(uid);
        let path = self.path_for_ref(&result_ref);
        let tmp_path = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(texts).map_err(|e| StorageError::CorruptArtifact {
            path: path.clone(),
            source: e,
        })?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::MoveFile {
                from: tmp_path.clone(),
                to: path.clone(),
                source: e,
            })?;

        debug!(uid = %uid, slides = texts.len(), "Artifact written");
        Ok(result_ref)
    }

    /// Reads the artifact behind `result_ref`. `Ok(None)` means it is not
    /// there (yet).
    pub fn read(&self, result_ref: &str) -> Result<Option<Vec<String>>, StorageError> {
        let path = self.path_for_ref(result_ref);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadFile { path, source: e }),
        };
        let texts = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::CorruptArtifact { path, source: e })?;
        Ok(Some(texts))
    }
}
