//! Stage area: the three directories a job's document moves through.
//!
//! `uploads/` (intake) → `processing/` (in progress) → `archive/`.
//! Every file is named `<uid>.pptx`, so the stage a document is in can be
//! found from the uid alone. Moves between stages are plain renames inside
//! one data directory, which are atomic on the same filesystem; there is no
//! copy fallback, so a document is never visible in two stages at once.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::StorageError;

const DOCUMENT_EXTENSION: &str = "pptx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageLocation {
    Intake,
    InProgress,
    Archived,
}

impl StageLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageLocation::Intake => "intake",
            StageLocation::InProgress => "in_progress",
            StageLocation::Archived => "archived",
        }
    }
}

impl fmt::Display for StageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    std::fs::rename(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })
}

/// Writes `content` to `temp`, then renames it to `target`. Once `temp`
/// exists, any failure removes it again.
fn write_then_rename(temp: &Path, target: &Path, content: &[u8]) -> Result<(), StorageError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .map_err(|e| StorageError::WriteFile {
            path: temp.to_path_buf(),
            source: e,
        })?;
    let written = file
        .write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::WriteFile {
            path: temp.to_path_buf(),
            source: e,
        });
    drop(file);

    let result = written.and_then(|_| move_file(temp, target));
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(temp) {
            warn!(path = %temp.display(), error = %e, "Could not remove partial upload");
        }
    }
    result
}

#[derive(Debug, Clone)]
pub struct StageArea {
    intake_dir: PathBuf,
    in_progress_dir: PathBuf,
    archive_dir: PathBuf,
}

impl StageArea {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        let root = data_directory.as_ref();
        Self {
            intake_dir: root.join("uploads"),
            in_progress_dir: root.join("processing"),
            archive_dir: root.join("archive"),
        }
    }

    /// Creates the stage directories if they do not exist yet.
    pub fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [&self.intake_dir, &self.in_progress_dir, &self.archive_dir] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn directory(&self, location: StageLocation) -> &Path {
        match location {
            StageLocation::Intake => &self.intake_dir,
            StageLocation::InProgress => &self.in_progress_dir,
            StageLocation::Archived => &self.archive_dir,
        }
    }

    pub fn path_for(&self, location: StageLocation, uid: &str) -> PathBuf {
        self.directory(location)
            .join(format!("{}.{}", uid, DOCUMENT_EXTENSION))
    }

    /// Writes a new document into intake.
    ///
    /// The bytes go to a hidden temp file first and are renamed into place,
    /// so a scanning worker never sees a partially written document.
    pub fn place(&self, uid: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_directories()?;

        let target = self.path_for(StageLocation::Intake, uid);
        if std::fs::symlink_metadata(&target).is_ok() {
            return Err(StorageError::FileExists(target));
        }

        let temp = self.intake_dir.join(format!(".{}.part", uid));
        write_then_rename(&temp, &target, content)?;
        debug!(uid = %uid, path = %target.display(), "Document placed in intake");
        Ok(target)
    }

    /// Moves a document from intake to in-progress.
    pub fn claim(&self, uid: &str) -> Result<PathBuf, StorageError> {
        self.ensure_directories()?;
        let from = self.path_for(StageLocation::Intake, uid);
        let to = self.path_for(StageLocation::InProgress, uid);
        move_file(&from, &to)?;
        debug!(uid = %uid, "Document claimed");
        Ok(to)
    }

    /// Moves a document from in-progress to the archive.
    pub fn archive(&self, uid: &str) -> Result<PathBuf, StorageError> {
        self.ensure_directories()?;
        let from = self.path_for(StageLocation::InProgress, uid);
        let to = self.path_for(StageLocation::Archived, uid);
        move_file(&from, &to)?;
        debug!(uid = %uid, "Document archived");
        Ok(to)
    }

    /// Finds the stage holding `uid`'s document.
    ///
    /// Stages are checked in the direction documents move, so a document
    /// renamed concurrently with the lookup is still found in its new stage.
    pub fn locate(&self, uid: &str) -> Option<StageLocation> {
        [
            StageLocation::Intake,
            StageLocation::InProgress,
            StageLocation::Archived,
        ]
        .into_iter()
        .find(|location| self.path_for(*location, uid).is_file())
    }

    /// Lists the uids of documents currently in `location`.
    pub fn list(&self, location: StageLocation) -> Result<Vec<String>, StorageError> {
        let dir = self.directory(location);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut uids = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::ListDirectory {
                path: dir.to_path_buf(),
                source: e,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_document = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == DOCUMENT_EXTENSION);
            let stem = path.file_stem().and_then(|s| s.to_str());
            if let (true, Some(stem)) = (is_document, stem) {
                if !stem.starts_with('.') {
                    uids.push(stem.to_string());
                }
            }
        }
        uids.sort();
        Ok(uids)
    }
}
