//! Intake: accepts an uploaded deck and turns it into a pending job.
//!
//! The record is created as `uploaded`, the document is placed in the
//! intake stage, and only then is the job advanced to `pending`. A worker
//! therefore never sees a pending job whose document is still being written.

use std::path::Path;

use tracing::{error, info};

use crate::error::{IntakeError, StorageError};
use crate::jobs::{Job, JobStatus, JobStore};
use crate::stage::StageArea;

const ALLOWED_EXTENSIONS: &[&str] = &["pptx"];

/// Validates an upload's file name and returns its display form (the last
/// path component).
pub fn validate_upload(name: &str, content: &[u8]) -> Result<String, IntakeError> {
    let display_name = Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_default();
    if display_name.is_empty() {
        return Err(IntakeError::MissingName);
    }

    let allowed = display_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if !allowed {
        return Err(IntakeError::UnsupportedType { name: display_name });
    }

    if content.is_empty() {
        return Err(IntakeError::EmptyDocument { name: display_name });
    }

    Ok(display_name)
}

#[derive(Clone)]
pub struct Intake {
    store: JobStore,
    stage: StageArea,
}

impl Intake {
    pub fn new(store: JobStore, stage: StageArea) -> Self {
        Self { store, stage }
    }

    /// Registers an upload and returns the pending job.
    pub fn submit(
        &self,
        name: &str,
        content: &[u8],
        owner: Option<&str>,
    ) -> Result<Job, IntakeError> {
        let display_name = validate_upload(name, content)?;
        let owner = owner.map(str::trim).filter(|o| !o.is_empty());

        let mut job = self.store.create(&display_name, owner)?;
        if let Err(e) = self.stage.place(&job.uid, content) {
            error!(
                uid = %job.uid,
                error = %e,
                "Upload could not be staged; job stays uploaded and will not be processed"
            );
            return Err(e.into());
        }
        self.store.advance(&job.uid, JobStatus::Pending)?;
        job.status = JobStatus::Pending;

        info!(
            uid = %job.uid,
            filename = %job.original_name,
            bytes = content.len(),
            "Upload accepted"
        );
        Ok(job)
    }

    /// Reads a deck from disk and submits it under its file name.
    pub fn submit_file(&self, path: &Path, owner: Option<&str>) -> Result<Job, IntakeError> {
        let content = std::fs::read(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        self.submit(name, &content, owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::stage::StageLocation;
    use tempfile::TempDir;

    fn intake() -> (TempDir, Intake, JobStore, StageArea) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let stage = StageArea::new(dir.path());
        let intake = Intake::new(store.clone(), stage.clone());
        (dir, intake, store, stage)
    }

    #[test]
    fn test_validate_upload() {
        assert_eq!(validate_upload("deck.pptx", b"x").unwrap(), "deck.pptx");
        assert_eq!(validate_upload("DECK.PPTX", b"x").unwrap(), "DECK.PPTX");
        assert_eq!(
            validate_upload("/home/ann/talks/deck.pptx", b"x").unwrap(),
            "deck.pptx"
        );
        assert!(matches!(
            validate_upload("", b"x"),
            Err(IntakeError::MissingName)
        ));
        assert!(matches!(
            validate_upload("notes.docx", b"x"),
            Err(IntakeError::UnsupportedType { .. })
        ));
        assert!(matches!(
            validate_upload("pptx", b"x"),
            Err(IntakeError::UnsupportedType { .. })
        ));
        assert!(matches!(
            validate_upload("deck.pptx", b""),
            Err(IntakeError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn test_submit_creates_pending_job_and_stages_document() {
        let (_dir, intake, store, stage) = intake();

        let job = intake
            .submit("deck.pptx", b"deck bytes", Some("ann@example.com"))
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let stored = store.get(&job.uid).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.owner.as_deref(), Some("ann@example.com"));
        assert_eq!(stage.locate(&job.uid), Some(StageLocation::Intake));
    }

    #[test]
    fn test_rejected_upload_leaves_no_trace() {
        let (_dir, intake, store, stage) = intake();

        assert!(intake.submit("deck.key", b"x", None).is_err());
        assert!(store.list_by_status(&JobStatus::ALL).unwrap().is_empty());
        assert!(stage.list(StageLocation::Intake).unwrap().is_empty());
    }

    #[test]
    fn test_failed_placement_keeps_uploaded_record_visible() {
        use crate::results::ResultWriter;
        use crate::status::{StatusResolver, UPLOAD_NOT_STORED};

        let (dir, intake, store, stage) = intake();
        // A plain file where the intake directory should be.
        std::fs::write(dir.path().join("uploads"), b"").unwrap();

        let err = intake.submit("deck.pptx", b"deck", None).unwrap_err();
        assert!(matches!(err, IntakeError::Storage(_)));

        let stuck = store.list_by_status(&[JobStatus::Uploaded]).unwrap();
        assert_eq!(stuck.len(), 1);
        assert!(store.pending().unwrap().is_empty());

        let resolver = StatusResolver::new(store, stage, ResultWriter::new(dir.path()));
        let details = resolver.resolve(&stuck[0].uid).unwrap();
        assert_eq!(details.error.as_deref(), Some(UPLOAD_NOT_STORED));
    }

    #[test]
    fn test_blank_owner_is_anonymous() {
        let (_dir, intake, _store, _stage) = intake();
        let job = intake.submit("deck.pptx", b"x", Some("  ")).unwrap();
        assert!(job.owner.is_none());
    }

    #[test]
    fn test_submit_file() {
        let (dir, intake, _store, stage) = intake();
        let path = dir.path().join("talk.pptx");
        std::fs::write(&path, b"bytes").unwrap();

        let job = intake.submit_file(&path, None).unwrap();
        assert_eq!(job.original_name, "talk.pptx");
        let staged = stage.path_for(StageLocation::Intake, &job.uid);
        assert_eq!(std::fs::read(staged).unwrap(), b"bytes");
    }
}
