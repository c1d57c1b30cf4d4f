use thiserror::Error;

/// Why one job could not be completed. Recorded as the job's failure reason.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] crate::error::ExtractionError),

    #[error("Generation failed: {0}")]
    Generation(#[from] crate::error::ServiceError),

    #[error("Storing the result failed: {0}")]
    Result(#[from] crate::error::StorageError),

    #[error("{0}")]
    Inconsistent(#[from] crate::error::WorkerError),
}
