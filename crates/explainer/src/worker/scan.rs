//! One reconciliation pass over the job store and the stage area.
//!
//! The store decides which jobs are live; the stage area tells the worker
//! what state a live job's document is in, which is how work interrupted by
//! a crash is recognised and resumed.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::jobs::{Job, JobStatus, JobStore};
use crate::stage::{StageArea, StageLocation};

/// What the worker should do with one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move the document from intake to in-progress, then process.
    Claim,
    /// The document is already in progress; (re)process it.
    Resume,
    /// A live job whose document cannot be processed. Fail it.
    MarkMissing,
    /// A finished job whose document never left in-progress.
    ArchiveLeftover,
    Skip,
}

/// Decides the action for a job in `status` whose document is at `location`.
pub fn reconcile(status: JobStatus, location: Option<StageLocation>) -> Action {
    match (status, location) {
        (JobStatus::Pending | JobStatus::Processing, Some(StageLocation::Intake)) => Action::Claim,
        (JobStatus::Pending | JobStatus::Processing, Some(StageLocation::InProgress)) => {
            Action::Resume
        }
        (JobStatus::Pending | JobStatus::Processing, Some(StageLocation::Archived) | None) => {
            Action::MarkMissing
        }
        (JobStatus::Done | JobStatus::Failed, Some(StageLocation::InProgress)) => {
            Action::ArchiveLeftover
        }
        _ => Action::Skip,
    }
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job: Job,
    pub location: Option<StageLocation>,
    pub action: Action,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Live and leftover jobs, oldest upload first.
    pub items: Vec<WorkItem>,
    /// Staged documents with no job record.
    pub untracked: Vec<(StageLocation, String)>,
}

impl ScanReport {
    pub fn is_idle(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn scan(store: &JobStore, stage: &StageArea) -> Result<ScanReport, WorkerError> {
    let live = store
        .list_by_status(&[JobStatus::Pending, JobStatus::Processing])
        .map_err(|e| WorkerError::ScanError(e.to_string()))?;

    let mut report = ScanReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for job in live {
        let location = stage.locate(&job.uid);
        let action = reconcile(job.status, location);
        seen.insert(job.uid.clone());
        report.items.push(WorkItem {
            job,
            location,
            action,
        });
    }

    for location in [StageLocation::Intake, StageLocation::InProgress] {
        let uids = stage
            .list(location)
            .map_err(|e| WorkerError::ScanError(e.to_string()))?;
        for uid in uids {
            if seen.contains(&uid) {
                continue;
            }
            match store
                .get(&uid)
                .map_err(|e| WorkerError::ScanError(e.to_string()))?
            {
                Some(job) => {
                    let action = reconcile(job.status, Some(location));
                    if action == Action::Skip {
                        // An upload that intake has not finished registering.
                        debug!(uid = %uid, status = %job.status, stage = %location, "Skipping staged document");
                        continue;
                    }
                    seen.insert(uid);
                    report.items.push(WorkItem {
                        job,
                        location: Some(location),
                        action,
                    });
                }
                None => {
                    let inconsistency = WorkerError::StoreInconsistency {
                        uid: uid.clone(),
                        detail: format!("document in {} has no job record", location),
                    };
                    warn!(uid = %uid, stage = %location, "{}", inconsistency);
                    report.untracked.push((location, uid));
                }
            }
        }
    }

    debug!(
        items = report.items.len(),
        untracked = report.untracked.len(),
        "Scan complete"
    );
    Ok(report)
}
