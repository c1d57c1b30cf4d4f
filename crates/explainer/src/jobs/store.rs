//! Durable job store backed by the SQLite database.
//!
//! The store is the primary source of truth for a job's status. Every
//! mutation is a single-row compare-and-set, so the intake process and the
//! worker process can share one database file without cross-job locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::job_repo::{self, FinishFields, JobRow, NewJobRow};
use crate::db::{user_repo, Database, DatabaseError};

use super::status::JobStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("No job with uid '{uid}'")]
    NotFound { uid: String },

    #[error("Job {uid} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        uid: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {uid} has a corrupt record: {detail}")]
    Corrupt { uid: String, detail: String },
}

impl StoreError {
    /// The store was locked by another process; the step can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(e) if e.is_transient())
    }
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub original_name: String,
    pub status: JobStatus,
    pub upload_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
    /// Only meaningful while `status == Done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// The artifact reference, present only for completed jobs.
    pub fn result(&self) -> Option<&str> {
        match self.status {
            JobStatus::Done => self.result_ref.as_deref(),
            _ => None,
        }
    }
}

/// Outcome of looking a job up by owner and original file name.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerLookup {
    UnknownOwner,
    NoMatch,
    Found(Job),
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Records a new job in status `uploaded` with a freshly generated uid.
    pub fn create(&self, original_name: &str, owner: Option<&str>) -> Result<Job, StoreError> {
        let user_id = match owner {
            Some(email) => Some(user_repo::find_or_create(&self.db, email)?),
            None => None,
        };

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let upload_time = Utc::now();
        job_repo::insert(
            &self.db,
            &NewJobRow {
                uid: uid.clone(),
                filename: original_name.to_string(),
                status: JobStatus::Uploaded.as_str().to_string(),
                upload_time: format_timestamp(upload_time),
                user_id,
            },
        )?;

        debug!(uid = %uid, filename = original_name, "Job record created");

        Ok(Job {
            uid,
            owner: owner.map(str::to_string),
            original_name: original_name.to_string(),
            status: JobStatus::Uploaded,
            upload_time,
            finish_time: None,
            result_ref: None,
            error: None,
        })
    }

    pub fn get(&self, uid: &str) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_uid(&self.db, uid)?
            .map(|row| self.job_from_row(row))
            .transpose()
    }

    /// Moves a job into a non-terminal status (`pending` or `processing`).
    pub fn advance(&self, uid: &str, to: JobStatus) -> Result<(), StoreError> {
        debug_assert!(!to.is_terminal(), "terminal statuses go through finish");
        let from = status_strs(to.predecessors());
        let changed = job_repo::compare_and_set_status(&self.db, uid, &from, to.as_str())?;
        if changed == 0 {
            return Err(self.rejected_transition(uid, to)?);
        }
        info!(uid = %uid, status = %to, "Job status updated");
        Ok(())
    }

    /// Marks a `processing` job as done. The artifact referenced by
    /// `result_ref` must already be readable.
    pub fn mark_done(&self, uid: &str, result_ref: &str) -> Result<(), StoreError> {
        self.finish(
            uid,
            JobStatus::Done,
            FinishFields {
                finish_time: &format_timestamp(Utc::now()),
                result_ref: Some(result_ref),
                error: None,
            },
        )
    }

    /// Marks a `pending` or `processing` job as failed with `reason`.
    pub fn mark_failed(&self, uid: &str, reason: &str) -> Result<(), StoreError> {
        self.finish(
            uid,
            JobStatus::Failed,
            FinishFields {
                finish_time: &format_timestamp(Utc::now()),
                result_ref: None,
                error: Some(reason),
            },
        )
    }

    fn finish(&self, uid: &str, to: JobStatus, fields: FinishFields<'_>) -> Result<(), StoreError> {
        let from = status_strs(to.predecessors());
        let changed = job_repo::finish(&self.db, uid, &from, to.as_str(), &fields)?;
        if changed == 0 {
            return Err(self.rejected_transition(uid, to)?);
        }
        info!(uid = %uid, status = %to, "Job finished");
        Ok(())
    }

    /// Explains why a compare-and-set changed nothing.
    fn rejected_transition(&self, uid: &str, to: JobStatus) -> Result<StoreError, StoreError> {
        match self.get(uid)? {
            None => Ok(StoreError::NotFound {
                uid: uid.to_string(),
            }),
            Some(job) => Ok(StoreError::InvalidTransition {
                uid: uid.to_string(),
                from: job.status,
                to,
            }),
        }
    }

    /// Lists jobs in any of `statuses`, oldest upload first.
    pub fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        job_repo::list_by_status(&self.db, &status_strs(statuses))?
            .into_iter()
            .map(|row| self.job_from_row(row))
            .collect()
    }

    pub fn pending(&self) -> Result<Vec<Job>, StoreError> {
        self.list_by_status(&[JobStatus::Pending])
    }

    pub fn count(&self, status: JobStatus) -> Result<u64, StoreError> {
        Ok(job_repo::count_by_status(&self.db, status.as_str())?)
    }

    /// Finds the most recently uploaded job of `owner` named `original_name`.
    pub fn latest_for_owner(
        &self,
        owner: &str,
        original_name: &str,
    ) -> Result<OwnerLookup, StoreError> {
        let Some(user_id) = user_repo::find_by_email(&self.db, owner)? else {
            return Ok(OwnerLookup::UnknownOwner);
        };
        match job_repo::latest_for_user_and_filename(&self.db, user_id, original_name)? {
            Some(row) => Ok(OwnerLookup::Found(self.job_from_row(row)?)),
            None => Ok(OwnerLookup::NoMatch),
        }
    }

    /// All jobs of `owner`, newest first. Unknown owners have no jobs.
    pub fn jobs_for_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError> {
        let Some(user_id) = user_repo::find_by_email(&self.db, owner)? else {
            return Ok(Vec::new());
        };
        job_repo::list_for_user(&self.db, user_id)?
            .into_iter()
            .map(|row| self.job_from_row(row))
            .collect()
    }

    fn job_from_row(&self, row: JobRow) -> Result<Job, StoreError> {
        let status: JobStatus = row.status.parse().map_err(|e| StoreError::Corrupt {
            uid: row.uid.clone(),
            detail: format!("{}", e),
        })?;
        let upload_time = parse_timestamp(&row.upload_time, &row.uid)?;
        let finish_time = row
            .finish_time
            .as_deref()
            .map(|s| parse_timestamp(s, &row.uid))
            .transpose()?;
        let owner = match row.user_id {
            Some(id) => user_repo::email_for_id(&self.db, id)?,
            None => None,
        };

        Ok(Job {
            uid: row.uid,
            owner,
            original_name: row.filename,
            status,
            upload_time,
            finish_time,
            result_ref: row.result_ref,
            error: row.error,
        })
    }
}

fn status_strs(statuses: &[JobStatus]) -> Vec<&'static str> {
    statuses.iter().map(JobStatus::as_str).collect()
}

fn parse_timestamp(s: &str, uid: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            uid: uid.to_string(),
            detail: format!("bad timestamp '{}': {}", s, e),
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
