//! Answers "what is the state of job X".
//!
//! The job store record is authoritative. The stage area and the artifact
//! directory only fill in what the record cannot say on its own: where a
//! non-terminal job's document currently sits, and whether a completed
//! job's artifact can be read yet.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::jobs::{Job, JobStatus, JobStore, OwnerLookup, StoreError};
use crate::results::ResultWriter;
use crate::stage::{StageArea, StageLocation};

/// Reported as the error of an upload whose document never reached intake.
pub const UPLOAD_NOT_STORED: &str =
    "Upload was not stored and will not be processed; submit the deck again";

/// Shown instead of the explanations while a completed job's artifact
/// cannot be read.
pub const ARTIFACT_PLACEHOLDER: &str = "Explanation is not available yet, please check back shortly";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Not found: {query}")]
    NotFound { query: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Explanation {
    /// Per-slide text in slide order.
    Ready(Vec<String>),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub uid: String,
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub status: JobStatus,
    pub upload_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stage holding the document; only reported for non-terminal jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<StageLocation>,
    /// Present only when `status == done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

#[derive(Clone)]
pub struct StatusResolver {
    store: JobStore,
    stage: StageArea,
    results: ResultWriter,
}

impl StatusResolver {
    pub fn new(store: JobStore, stage: StageArea, results: ResultWriter) -> Self {
        Self {
            store,
            stage,
            results,
        }
    }

    pub fn resolve(&self, uid: &str) -> Result<JobDetails, ResolveError> {
        match self.store.get(uid)? {
            Some(job) => Ok(self.details(job)),
            None => {
                if self.stage.locate(uid).is_some() {
                    warn!(uid = %uid, "Document is staged but has no job record");
                }
                Err(ResolveError::NotFound {
                    query: format!("job '{}'", uid),
                })
            }
        }
    }

    /// Resolves the most recent upload named `original_name` by `owner`.
    pub fn resolve_by_owner_and_name(
        &self,
        owner: &str,
        original_name: &str,
    ) -> Result<JobDetails, ResolveError> {
        match self.store.latest_for_owner(owner, original_name)? {
            OwnerLookup::Found(job) => Ok(self.details(job)),
            OwnerLookup::UnknownOwner => Err(ResolveError::NotFound {
                query: format!("owner '{}'", owner),
            }),
            OwnerLookup::NoMatch => Err(ResolveError::NotFound {
                query: format!("upload '{}' of '{}'", original_name, owner),
            }),
        }
    }

    /// Every job of `owner`, newest first.
    pub fn history(&self, owner: &str) -> Result<Vec<JobDetails>, ResolveError> {
        Ok(self
            .store
            .jobs_for_owner(owner)?
            .into_iter()
            .map(|job| self.details(job))
            .collect())
    }

    fn details(&self, job: Job) -> JobDetails {
        let location = if job.status.is_terminal() {
            None
        } else {
            self.stage.locate(&job.uid)
        };
        let explanation = (job.status == JobStatus::Done).then(|| self.explanation(&job));
        let error = match (job.status, location) {
            (JobStatus::Uploaded, None) => {
                warn!(uid = %job.uid, "Upload has no staged document");
                job.error.or_else(|| Some(UPLOAD_NOT_STORED.to_string()))
            }
            _ => job.error,
        };

        JobDetails {
            uid: job.uid,
            original_name: job.original_name,
            owner: job.owner,
            status: job.status,
            upload_time: job.upload_time,
            finish_time: job.finish_time,
            error,
            location,
            explanation,
        }
    }

    fn explanation(&self, job: &Job) -> Explanation {
        let Some(result_ref) = job.result() else {
            warn!(uid = %job.uid, "Completed job has no result reference");
            return Explanation::Placeholder(ARTIFACT_PLACEHOLDER.to_string());
        };
        match self.results.read(result_ref) {
            Ok(Some(texts)) => Explanation::Ready(texts),
            Ok(None) => {
                debug!(uid = %job.uid, "Artifact not readable yet");
                Explanation::Placeholder(ARTIFACT_PLACEHOLDER.to_string())
            }
            Err(e) => {
                warn!(uid = %job.uid, error = %e, "Artifact unreadable");
                Explanation::Placeholder(ARTIFACT_PLACEHOLDER.to_string())
            }
        }
    }
}
