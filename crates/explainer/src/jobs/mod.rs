pub mod status;
pub mod store;

pub use status::{JobStatus, UnknownStatus};
pub use store::{Job, JobStore, OwnerLookup, StoreError};
