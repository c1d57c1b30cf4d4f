use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{ConfigError, ExtractionError, WorkerError};
use crate::extract::{PptxExtractor, SlideExtractor};
use crate::generate::{SlideExplainer, TextGenerator};
use crate::jobs::{Job, JobStatus, JobStore, StoreError};
use crate::ratelimit::{Clock, RateLimiter};
use crate::results::ResultWriter;
use crate::stage::{StageArea, StageLocation};

use super::error::JobError;
use super::scan::{self, Action, WorkItem};

/// How a single work item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done { slides: usize },
    Failed { reason: String },
    Archived,
    /// The store refused or could not record a step; retried next scan.
    Deferred,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub done: usize,
    pub failed: usize,
    pub archived: usize,
    pub deferred: usize,
    pub untracked: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Done { .. } => self.done += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Archived => self.archived += 1,
            Outcome::Deferred => self.deferred += 1,
        }
    }
}

/// Drains pending jobs: claim, extract, explain, persist, finish.
///
/// Jobs are handled one at a time; slides inside a job run concurrently
/// up to the rate limiter's budget.
pub struct Worker {
    store: JobStore,
    stage: StageArea,
    results: ResultWriter,
    extractor: Arc<dyn SlideExtractor>,
    explainer: SlideExplainer,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        store: JobStore,
        stage: StageArea,
        results: ResultWriter,
        extractor: Arc<dyn SlideExtractor>,
        explainer: SlideExplainer,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            stage,
            results,
            extractor,
            explainer,
            clock,
            poll_interval,
        }
    }

    /// Wires a worker from configuration around the given generation
    /// service. Stage and artifact directories live under the data directory.
    pub fn from_config(
        config: &Config,
        store: JobStore,
        generator: Arc<dyn TextGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        crate::config::validate_config(config)?;
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, clock.clone())?);
        let explainer = SlideExplainer::new(
            generator,
            limiter,
            clock.clone(),
            config.generation.retry_policy(),
            config.generation.prompt_prefix.clone(),
        );

        Ok(Self::new(
            store,
            StageArea::new(&config.data_directory),
            ResultWriter::new(&config.data_directory),
            Arc::new(PptxExtractor::new()),
            explainer,
            clock,
            config.poll_interval(),
        ))
    }

    /// Polls until `shutdown` is set. A pass in progress is finished first.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError> {
        self.stage
            .ensure_directories()
            .map_err(|e| WorkerError::ScanError(e.to_string()))?;
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Worker started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.run_once().await {
                Ok(summary) if summary != PassSummary::default() => {
                    info!(?summary, "Pass finished");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Scan failed"),
            }
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.clock.sleep(self.poll_interval).await;
        }

        info!("Worker stopped");
        Ok(())
    }

    /// One scan followed by handling every item it found.
    pub async fn run_once(&self) -> Result<PassSummary, WorkerError> {
        let report = scan::scan(&self.store, &self.stage)?;
        let mut summary = PassSummary {
            untracked: report.untracked.len(),
            ..PassSummary::default()
        };

        for item in report.items {
            let span = info_span!("job", uid = %item.job.uid, filename = %item.job.original_name);
            let outcome = self.handle(item).instrument(span).await;
            summary.record(&outcome);
        }
        Ok(summary)
    }

    async fn handle(&self, item: WorkItem) -> Outcome {
        let WorkItem { job, location, action } = item;
        match action {
            Action::Claim => match self.stage.claim(&job.uid) {
                Ok(_) => self.start(job).await,
                Err(e) => {
                    warn!(error = %e, "Claim failed");
                    Outcome::Deferred
                }
            },
            Action::Resume => {
                info!(status = %job.status, "Resuming interrupted job");
                self.start(job).await
            }
            Action::MarkMissing => {
                let err = WorkerError::StoreInconsistency {
                    uid: job.uid.clone(),
                    detail: match location {
                        Some(l) => format!("{} job's document is already {}", job.status, l),
                        None => format!("{} job has no staged document", job.status),
                    },
                };
                warn!("{}", err);
                self.fail(&job, JobError::from(err))
            }
            Action::ArchiveLeftover => match self.stage.archive(&job.uid) {
                Ok(_) => {
                    info!(status = %job.status, "Archived leftover document");
                    Outcome::Archived
                }
                Err(e) => {
                    warn!(error = %e, "Archiving leftover document failed");
                    Outcome::Deferred
                }
            },
            Action::Skip => Outcome::Deferred,
        }
    }

    /// Marks the job processing (unless it already is) and runs it.
    async fn start(&self, job: Job) -> Outcome {
        if job.status == JobStatus::Pending {
            if let Err(e) = self.store.advance(&job.uid, JobStatus::Processing) {
                return deferred("mark job processing", &e);
            }
        }

        match self.process(&job).await {
            Ok((result_ref, slides)) => self.finish(&job, &result_ref, slides),
            Err(e) => self.fail(&job, e),
        }
    }

    /// Extraction, generation and the artifact write. Returns the result
    /// reference and the slide count.
    async fn process(&self, job: &Job) -> Result<(String, usize), JobError> {
        let path = self.stage.path_for(StageLocation::InProgress, &job.uid);
        let extractor = Arc::clone(&self.extractor);
        let slides = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| ExtractionError::TaskFailed(e.to_string()))??;
        debug!(slides = slides.len(), "Slides extracted");

        let texts = self.explainer.explain_all(&slides).await?;
        let result_ref = self.results.write(&job.uid, &texts).await?;
        Ok((result_ref, texts.len()))
    }

    fn finish(&self, job: &Job, result_ref: &str, slides: usize) -> Outcome {
        if let Err(e) = self.store.mark_done(&job.uid, result_ref) {
            // The artifact stays; the next scan resumes the job and rewrites it.
            return deferred("mark job done", &e);
        }
        info!(slides, "Job done");

        if let Err(e) = self.stage.archive(&job.uid) {
            warn!(error = %e, "Archiving finished document failed; retried next scan");
        }
        Outcome::Done { slides }
    }

    fn fail(&self, job: &Job, err: JobError) -> Outcome {
        let reason = err.to_string();
        warn!(reason = %reason, "Job failed");

        if let Err(e) = self.store.mark_failed(&job.uid, &reason) {
            return deferred("mark job failed", &e);
        }
        if self.stage.locate(&job.uid) == Some(StageLocation::InProgress) {
            if let Err(e) = self.stage.archive(&job.uid) {
                warn!(error = %e, "Archiving failed document failed; retried next scan");
            }
        }
        Outcome::Failed { reason }
    }
}

/// A store write that did not happen. The job is picked up again next scan.
fn deferred(step: &str, err: &StoreError) -> Outcome {
    if err.is_transient() {
        warn!(error = %err, "Could not {}, retried next scan", step);
    } else {
        error!(error = %err, "Could not {}", step);
    }
    Outcome::Deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::ServiceError;
    use crate::generate::RetryPolicy;
    use crate::ratelimit::TokioClock;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    /// Treats the document bytes as UTF-8, one slide per line.
    struct LineExtractor;

    impl SlideExtractor for LineExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ExtractionError::ReadDocument {
                    path: path.to_path_buf(),
                    source: e,
                }
            })?;
            if content.starts_with("corrupt") {
                return Err(ExtractionError::InvalidArchive("not a zip".into()));
            }
            Ok(content.lines().map(str::to_string).collect())
        }
    }

    struct Upper;

    #[async_trait]
    impl TextGenerator for Upper {
        async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
            Ok(prompt.to_uppercase())
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: JobStore,
        stage: StageArea,
        results: ResultWriter,
        worker: Worker,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let stage = StageArea::new(dir.path());
        let results = ResultWriter::new(dir.path());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let limiter =
            Arc::new(RateLimiter::new(10, Duration::from_secs(1), clock.clone()).unwrap());
        let explainer = SlideExplainer::new(
            Arc::new(Upper),
            limiter,
            clock.clone(),
            RetryPolicy::no_retries(),
            "",
        );
        let worker = Worker::new(
            store.clone(),
            stage.clone(),
            results.clone(),
            Arc::new(LineExtractor),
            explainer,
            clock,
            Duration::from_millis(10),
        );
        Fixture {
            _dir: dir,
            store,
            stage,
            results,
            worker,
        }
    }

    fn submit(f: &Fixture, content: &str) -> Job {
        let job = f.store.create("deck.pptx", None).unwrap();
        f.stage.place(&job.uid, content.as_bytes()).unwrap();
        f.store.advance(&job.uid, JobStatus::Pending).unwrap();
        job
    }

    #[tokio::test]
    async fn test_pending_job_is_processed() {
        let f = fixture();
        let job = submit(&f, "one\ntwo");

        let summary = f.worker.run_once().await.unwrap();
        assert_eq!(summary.done, 1);

        let done = f.store.get(&job.uid).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Done);
        let texts = f.results.read(done.result().unwrap()).unwrap().unwrap();
        assert_eq!(texts, vec!["ONE", "TWO"]);
        assert_eq!(f.stage.locate(&job.uid), Some(StageLocation::Archived));
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_job_and_archives() {
        let f = fixture();
        let job = submit(&f, "corrupt");

        let summary = f.worker.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);

        let failed = f.store.get(&job.uid).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("Extraction failed"));
        assert!(failed.result_ref.is_none());
        assert_eq!(f.stage.locate(&job.uid), Some(StageLocation::Archived));
    }

    #[tokio::test]
    async fn test_missing_document_fails_job() {
        let f = fixture();
        let job = f.store.create("deck.pptx", None).unwrap();
        f.store.advance(&job.uid, JobStatus::Pending).unwrap();

        let summary = f.worker.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        let failed = f.store.get(&job.uid).unwrap().unwrap();
        assert!(failed.error.unwrap().contains("no staged document"));
    }

    #[tokio::test]
    async fn test_second_pass_is_idle() {
        let f = fixture();
        submit(&f, "a");
        f.worker.run_once().await.unwrap();
        assert_eq!(f.worker.run_once().await.unwrap(), PassSummary::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let job = submit(&f, "x");
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = shutdown.clone();
        let store = f.store.clone();
        let uid = job.uid.clone();
        let stopper = async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if store.get(&uid).unwrap().unwrap().status.is_terminal() {
                    flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        };

        let (result, _) = tokio::join!(f.worker.run(shutdown), stopper);
        result.unwrap();
        assert_eq!(
            f.store.get(&job.uid).unwrap().unwrap().status,
            JobStatus::Done
        );
    }

    #[test]
    fn test_from_config_rejects_zero_rate_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_directory(dir.path());
        config.rate_limit.requests_per_window = 0;
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let result = Worker::from_config(&config, store, Arc::new(Upper), Arc::new(TokioClock));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRateLimit { .. })
        ));
    }
}
