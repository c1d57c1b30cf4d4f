use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplainerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Generation service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Job store error: {0}")]
    Store(#[from] crate::jobs::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid rate limit: {requests} requests per {window_secs}s window")]
    InvalidRateLimit { requests: u32, window_secs: u64 },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document is not a valid slide deck archive: {0}")]
    InvalidArchive(String),

    #[error("Missing archive part '{0}'")]
    MissingPart(String),

    #[error("Malformed XML in '{part}': {detail}")]
    MalformedXml { part: String, detail: String },

    #[error("Extraction task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("Request to generation service failed: {0}")]
    Transport(String),

    #[error("Generation service timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Generation service throttled the request (HTTP 429)")]
    RateLimited,

    #[error("Generation service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Generation service rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Malformed response from generation service: {0}")]
    MalformedResponse(String),

    #[error("Slide {slide}: generation failed after {attempts} attempts: {last}")]
    Exhausted {
        slide: usize,
        attempts: u32,
        last: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport(_) | ServiceError::Timeout { .. } | ServiceError::RateLimited => {
                true
            }
            ServiceError::Http { status, .. } => *status >= 500,
            ServiceError::Unauthorized { .. }
            | ServiceError::MalformedResponse(_)
            | ServiceError::Exhausted { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Failed to list directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Artifact '{path}' is not a JSON array of strings: {source}")]
    CorruptArtifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No file name was supplied")]
    MissingName,

    #[error("Unsupported file type '{name}': only .pptx decks are accepted")]
    UnsupportedType { name: String },

    #[error("Uploaded file '{name}' is empty")]
    EmptyDocument { name: String },

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to record upload: {0}")]
    Store(#[from] crate::jobs::StoreError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Store inconsistency for job {uid}: {detail}")]
    StoreInconsistency { uid: String, detail: String },

    #[error("Scan failed: {0}")]
    ScanError(String),
}

pub type Result<T> = std::result::Result<T, ExplainerError>;
