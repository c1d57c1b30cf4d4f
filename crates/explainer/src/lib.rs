pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod generate;
pub mod intake;
pub mod jobs;
pub mod ratelimit;
pub mod results;
pub mod secrets;
pub mod stage;
pub mod status;
pub mod worker;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, ExplainerError, ExtractionError, IntakeError, Result, ServiceError,
    StorageError, WorkerError,
};
pub use extract::{PptxExtractor, SlideExtractor};
pub use generate::{ChatCompletionsGenerator, RetryPolicy, SlideExplainer, TextGenerator};
pub use intake::Intake;
pub use jobs::{Job, JobStatus, JobStore, StoreError};
pub use ratelimit::{Clock, RateLimiter, TokioClock};
pub use results::ResultWriter;
pub use secrets::{resolve_secret, SecretError};
pub use stage::{StageArea, StageLocation};
pub use status::{Explanation, JobDetails, ResolveError, StatusResolver};
pub use worker::Worker;
