//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct owns a temporary data directory and a file-backed
//! job store. The intake side and the worker open separate database handles,
//! the same way the `submit` command and a running worker do.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use explainer::worker::PassSummary;
use explainer::{
    Clock, Database, Intake, Job, JobStatus, JobStore, PptxExtractor, RateLimiter, ResultWriter,
    RetryPolicy, SlideExplainer, StageArea, StatusResolver, TextGenerator, TokioClock, Worker,
};

use super::builders::DeckBuilder;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of stage directories and result artifacts.
    pub data_dir: PathBuf,
    /// Job store file shared by intake and worker.
    pub db_path: PathBuf,
    pub store: JobStore,
    pub stage: StageArea,
    pub results: ResultWriter,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        let db_path = data_dir.join("explainer.db");

        let stage = StageArea::new(&data_dir);
        stage
            .ensure_directories()
            .expect("Failed to create stage directories");
        let store = JobStore::new(Database::open(&db_path).expect("Failed to open job store"));

        Self {
            results: ResultWriter::new(&data_dir),
            temp_dir,
            data_dir,
            db_path,
            store,
            stage,
        }
    }

    pub fn intake(&self) -> Intake {
        Intake::new(self.store.clone(), self.stage.clone())
    }

    pub fn resolver(&self) -> StatusResolver {
        StatusResolver::new(self.store.clone(), self.stage.clone(), self.results.clone())
    }

    /// A second handle on the job store file.
    pub fn open_store(&self) -> JobStore {
        JobStore::new(Database::open(&self.db_path).expect("Failed to reopen job store"))
    }

    /// A second handle that gives up on a locked file after `timeout`.
    pub fn open_store_with_busy_timeout(&self, timeout: Duration) -> JobStore {
        JobStore::new(
            Database::open_with_busy_timeout(&self.db_path, timeout)
                .expect("Failed to reopen job store"),
        )
    }

    /// Worker over the real pptx extractor and the given generator.
    pub fn worker(
        &self,
        generator: Arc<dyn TextGenerator>,
        limit: u32,
        window: Duration,
        policy: RetryPolicy,
    ) -> Worker {
        self.worker_on(self.open_store(), generator, limit, window, policy)
    }

    pub fn worker_on(
        &self,
        store: JobStore,
        generator: Arc<dyn TextGenerator>,
        limit: u32,
        window: Duration,
        policy: RetryPolicy,
    ) -> Worker {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let limiter = Arc::new(
            RateLimiter::new(limit, window, clock.clone()).expect("Invalid rate limit"),
        );
        let explainer = SlideExplainer::new(generator, limiter, clock.clone(), policy, "explain: ");
        Worker::new(
            store,
            self.stage.clone(),
            self.results.clone(),
            Arc::new(PptxExtractor::new()),
            explainer,
            clock,
            Duration::from_secs(1),
        )
    }

    /// Worker with a generous limit and no retries.
    pub fn default_worker(&self, generator: Arc<dyn TextGenerator>) -> Worker {
        self.worker(
            generator,
            100,
            Duration::from_secs(1),
            RetryPolicy::no_retries(),
        )
    }

    /// Submits a deck through intake and returns the pending job.
    pub fn submit_deck(&self, name: &str, deck: &DeckBuilder) -> Job {
        self.intake()
            .submit(name, &deck.build(), None)
            .expect("Failed to submit deck")
    }

    pub async fn run_pass(&self, worker: &Worker) -> PassSummary {
        worker.run_once().await.expect("Worker pass failed")
    }

    pub fn job(&self, uid: &str) -> Job {
        self.store
            .get(uid)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    pub fn status(&self, uid: &str) -> JobStatus {
        self.job(uid).status
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
