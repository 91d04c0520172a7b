//! Job lifecycle: one tokio task per job, driven URL by URL.
//!
//! The executor owns every job's progress record. Callers only ever get
//! copies through `status` and `progress`.

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::ScrapeError;
use crate::extractor::FieldExtractor;
use crate::fetcher::{FetchStats, PageFetcher};
use crate::identity::IdentityRotator;
use crate::job::{
    JobConfig, JobId, JobSettings, JobStatus, MAX_JOB_DELAY_SECS, PageOutcome, PageResult,
    ProgressSnapshot,
};
use crate::rate_limit::RateLimiter;
use crate::robots::RobotsPolicyCache;
use crate::utils::validate_url;

struct JobRecord {
    run_id: u64,
    progress: ProgressSnapshot,
    status_tx: watch::Sender<JobStatus>,
}

struct RunningJob {
    run_id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    config: EngineConfig,
    identities: Arc<IdentityRotator>,
    robots: RobotsPolicyCache,
    fetcher: PageFetcher,
    jobs: DashMap<JobId, JobRecord>,
    running: Mutex<HashMap<JobId, RunningJob>>,
    next_run: AtomicU64,
}

/// Runs scraping jobs and keeps their progress for the process lifetime.
#[derive(Clone)]
pub struct JobExecutor {
    shared: Arc<Shared>,
}

impl JobExecutor {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let identities = Arc::new(IdentityRotator::new());
        let rate_limiter = Arc::new(RateLimiter::from_config(&config));
        let robots = RobotsPolicyCache::from_config(&config)?;
        let fetcher = PageFetcher::new(&config, Arc::clone(&identities), rate_limiter)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                identities,
                robots,
                fetcher,
                jobs: DashMap::new(),
                running: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(1),
            }),
        })
    }

    /// Start `config` under `job_id`. Returns false, and changes nothing, when
    /// that id already has a live task.
    pub fn start(&self, job_id: JobId, config: JobConfig) -> bool {
        let mut running = self.shared.running();
        if let Some(job) = running.get(&job_id) {
            if !job.handle.is_finished() {
                log::warn!("Job {} is already running", job_id);
                return false;
            }
        }

        let run_id = self.shared.next_run.fetch_add(1, Ordering::Relaxed);
        let mut progress = ProgressSnapshot::new(job_id, config.urls.len());
        progress.status = JobStatus::Running;
        let (status_tx, _) = watch::channel(JobStatus::Running);
        self.shared.jobs.insert(
            job_id,
            JobRecord {
                run_id,
                progress,
                status_tx,
            },
        );

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            shared.run_job(job_id, run_id, config, task_token).await;
        });

        running.insert(
            job_id,
            RunningJob {
                run_id,
                token,
                handle,
            },
        );
        true
    }

    /// Cancel a live job and wait for its task to acknowledge. The job ends
    /// up Paused. Returns false when there is no live task.
    pub async fn stop(&self, job_id: JobId) -> bool {
        let job = match self.shared.running().remove(&job_id) {
            Some(job) => job,
            None => return false,
        };
        if job.handle.is_finished() {
            return false;
        }

        job.token.cancel();
        if let Err(e) = job.handle.await {
            log::error!("Job {} task ended abnormally: {}", job_id, e);
        }

        if let Err(e) = self.shared.update(job_id, job.run_id, |progress| {
            progress.status = JobStatus::Paused;
        }) {
            log::debug!("Job {} not marked paused: {}", job_id, e);
        }
        log::info!("⏸️  Job {} paused", job_id);
        true
    }

    /// Stop every live job; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<JobId> = self.shared.running().keys().copied().collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop(id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.shared.jobs.get(&job_id).map(|record| record.progress.status)
    }

    pub fn progress(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.shared.jobs.get(&job_id).map(|record| record.progress.clone())
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.shared
            .running()
            .get(&job_id)
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Resolves once the job leaves Pending/Running; None for unknown ids.
    pub async fn wait(&self, job_id: JobId) -> Option<JobStatus> {
        let mut rx = self.shared.jobs.get(&job_id)?.status_tx.subscribe();
        let finished = rx
            .wait_for(|status| !matches!(status, JobStatus::Pending | JobStatus::Running))
            .await
            .map(|status| *status);
        match finished {
            Ok(status) => Some(status),
            // the job was restarted and its record replaced
            Err(_) => self.status(job_id),
        }
    }

    pub fn stats(&self) -> FetchStats {
        self.shared.fetcher.stats()
    }
}

impl Shared {
    fn running(&self) -> MutexGuard<'_, HashMap<JobId, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate a job's progress, unless the record now belongs to a newer run.
    fn update<F>(&self, job_id: JobId, run_id: u64, f: F) -> Result<(), ScrapeError>
    where
        F: FnOnce(&mut ProgressSnapshot),
    {
        let mut record = self.jobs.get_mut(&job_id).ok_or_else(|| {
            ScrapeError::Internal(format!("progress record for job {} is missing", job_id))
        })?;
        if record.run_id != run_id {
            return Err(ScrapeError::Internal(format!(
                "job {} was restarted by another run",
                job_id
            )));
        }

        f(&mut record.progress);
        let status = record.progress.status;
        record.status_tx.send_replace(status);
        Ok(())
    }

    fn release(&self, job_id: JobId, run_id: u64) {
        let mut running = self.running();
        if running.get(&job_id).is_some_and(|job| job.run_id == run_id) {
            running.remove(&job_id);
        }
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: JobId,
        run_id: u64,
        config: JobConfig,
        token: CancellationToken,
    ) {
        let outcome = AssertUnwindSafe(self.execute(job_id, run_id, &config, &token))
            .catch_unwind()
            .await;

        // no live task once the final status is visible to `wait` and `status`
        self.release(job_id, run_id);

        let recorded = match outcome {
            Ok(Ok(())) => {
                let recorded = self.update(job_id, run_id, ProgressSnapshot::complete);
                if let Some(progress) = self.jobs.get(&job_id) {
                    log::info!(
                        "✅ Job {} completed: {} pages, {} failed",
                        job_id,
                        progress.progress.pages_scraped,
                        progress.progress.failed_pages()
                    );
                }
                recorded
            }
            Ok(Err(ScrapeError::Cancelled)) => {
                log::info!("Job {} cancelled", job_id);
                self.update(job_id, run_id, |progress| progress.status = JobStatus::Paused)
            }
            Ok(Err(e)) => {
                log::error!("❌ Job {} failed: {}", job_id, e);
                self.update(job_id, run_id, |progress| progress.fail(e.to_string()))
            }
            Err(panic) => {
                let message = format!(
                    "Internal fault: job task panicked: {}",
                    panic_message(panic.as_ref())
                );
                log::error!("❌ Job {} failed: {}", job_id, message);
                self.update(job_id, run_id, |progress| progress.fail(message))
            }
        };
        if let Err(e) = recorded {
            log::warn!("Final state of job {} not recorded: {}", job_id, e);
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        run_id: u64,
        config: &JobConfig,
        token: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        let extractor = FieldExtractor::new(config.validate()?);
        let settings = &config.settings;

        log::info!("🚀 Job {} started: {} URL(s)", job_id, config.urls.len());

        for (index, raw_url) in config.urls.iter().enumerate() {
            if token.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }
            if index > 0 {
                let pause = self.inter_page_delay(settings.delay);
                cancellable(token, sleep(pause)).await?;
            }

            let identity = self.identities.identity_for(settings.identity_hint);
            let page = self.scrape_page(raw_url, &identity, settings, &extractor);
            let scraped = cancellable(token, page).await?;
            let result = match scraped {
                Ok(result) => result,
                Err(e) if e.is_page_level() => PageResult::failed(raw_url, &e, Some(identity)),
                Err(e) => return Err(e),
            };

            if result.success {
                log::info!(
                    "Job {}: Scraped {} - {} fields extracted",
                    job_id,
                    result.url,
                    result.data.len()
                );
            } else {
                log::warn!(
                    "Job {}: Failed to scrape {} - {}",
                    job_id,
                    raw_url,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }

            self.update(job_id, run_id, |progress| progress.record(result))?;
        }

        Ok(())
    }

    async fn scrape_page(
        &self,
        raw_url: &str,
        identity: &str,
        settings: &JobSettings,
        extractor: &FieldExtractor,
    ) -> Result<PageResult, ScrapeError> {
        let url = validate_url(raw_url, &self.config.default_scheme)?;

        let verdict = self
            .robots
            .evaluate(url.as_str(), identity, settings.respect_robots)
            .await;
        if !verdict.allowed {
            self.fetcher.record_robots_block();
            log::warn!("Robots.txt blocked: {} ({})", url, verdict.reason);
            return Err(ScrapeError::RobotsDisallowed {
                reason: verdict.reason,
                alternative_identity: verdict.alternative_identity,
            });
        }

        let page = self.fetcher.fetch(&url, identity).await?;
        let extraction = extractor.extract(&page.body, &page.final_url);
        let quality = extraction.check_quality().err();

        Ok(PageResult {
            url: url.to_string(),
            data: extraction.fields,
            timestamp: Utc::now(),
            success: quality.is_none(),
            outcome: match quality {
                Some(_) => PageOutcome::NoData,
                None => PageOutcome::Success,
            },
            error: quality.map(|e| e.to_string()),
            status_code: Some(page.status),
            response_time_ms: Some(page.elapsed.as_millis() as u64),
            identity: Some(page.identity),
        })
    }

    /// `delay + uniform(0, max_jitter)`, saturating at the longest job delay.
    fn inter_page_delay(&self, delay: f64) -> Duration {
        let jitter = if self.config.max_jitter_secs > 0.0 {
            rand::rng().random_range(0.0..=self.config.max_jitter_secs)
        } else {
            0.0
        };
        let longest = Duration::from_secs_f64(MAX_JOB_DELAY_SECS);
        Duration::try_from_secs_f64(delay + jitter)
            .map(|pause| pause.min(longest))
            .unwrap_or(longest)
    }
}

/// Run `fut` unless `token` fires first.
async fn cancellable<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, ScrapeError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ScrapeError::Cancelled),
        output = fut => Ok(output),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
