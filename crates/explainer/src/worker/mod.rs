//! The worker loop: discovers pending jobs and drives them to a terminal
//! status.

pub mod error;
pub mod runner;
pub mod scan;

pub use error::JobError;
pub use runner::{Outcome, PassSummary, Worker};
pub use scan::{reconcile, scan, Action, ScanReport, WorkItem};
