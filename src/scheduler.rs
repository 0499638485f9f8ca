//! Time-driven execution of registered jobs.
//!
//! A [`Scheduler`] owns the [`ScheduleRegistry`] and the collaborators a
//! firing needs. Each firing runs fetch → extract → distribute strictly in
//! sequence and stops at the first failing stage:
//!
//! ```text
//! tick ─► begin_firing (status=running, last_run_at=now)
//!           │
//!           ├─ FetchGateway::fetch      ─┐
//!           ├─ extract_records           ├─ error ─► status=error
//!           ├─ (json archive, optional)  │
//!           └─ distribute               ─┘
//!                    │
//!                    └─► status=completed (even if some deliveries failed)
//! ```
//!
//! Firings run as their own tasks, outside the registry lock. Removing a job
//! stops its timer; a firing already underway finishes and its status update
//! is dropped.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::distribute::{DistributionReport, Notifier, distribute};
use crate::errors::{ConfigError, NotFoundError, PipelineError, ScheduleError};
use crate::extractor::extract_records;
use crate::fetch::FetchGateway;
use crate::models::{FiringSummary, JobConfig, JobId, JobStatus, JobView, Record};
use crate::outputs::json;
use crate::registry::{FireFn, OverlapPolicy, ScheduleRegistry};
use crate::retry::{RetryPolicy, RetryingGateway};

/// Source of job definitions, read once when the scheduler starts.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<JobConfig>, ConfigError>;
}

/// Knobs that apply to every job.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSettings {
    pub overlap: OverlapPolicy,
    pub retry: RetryPolicy,
    /// Deliver a digest even when a firing extracted nothing.
    pub send_empty_digest: bool,
    /// Archive every non-empty batch under this directory.
    pub archive_dir: Option<String>,
}

/// How one firing ended.
#[derive(Debug)]
pub enum FiringOutcome {
    Completed {
        records: Vec<Record>,
        report: DistributionReport,
    },
    Failed(PipelineError),
    /// Not run: the job was gone, or the overlap policy refused it.
    Skipped,
}

impl FiringOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FiringOutcome::Completed { .. })
    }
}

/// Result of loading jobs from a [`Repository`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub registered: Vec<JobId>,
    /// Jobs that could not be registered, with the reason.
    pub rejected: Vec<(JobId, String)>,
}

struct SchedulerInner {
    registry: ScheduleRegistry,
    gateway: Arc<dyn FetchGateway>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
}

/// Cloneable handle on the running scheduler; also the admin surface.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Build a scheduler. `gateway` is wrapped with the retry policy from
    /// `settings`.
    pub fn new(
        gateway: Arc<dyn FetchGateway>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        let gateway: Arc<dyn FetchGateway> =
            Arc::new(RetryingGateway::new(gateway, settings.retry));
        Self {
            inner: Arc::new(SchedulerInner {
                registry: ScheduleRegistry::new(),
                gateway,
                notifier,
                settings,
            }),
        }
    }

    /// Load every job from `repository` in a background task.
    ///
    /// The returned handle resolves once loading is done, so callers can
    /// wait for the registry to be populated.
    pub fn start(
        &self,
        repository: Arc<dyn Repository>,
    ) -> JoinHandle<Result<LoadSummary, ConfigError>> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.load(repository.as_ref()).await })
    }

    /// Register every job the repository lists. Jobs that fail to register
    /// are logged and reported; they do not stop the others.
    pub async fn load(&self, repository: &dyn Repository) -> Result<LoadSummary, ConfigError> {
        let configs = repository.list_jobs().await?;
        info!(count = configs.len(), "Loading jobs");

        let mut summary = LoadSummary::default();
        for config in configs {
            let id = config.id.clone();
            match self.add_job(config).await {
                Ok(id) => summary.registered.push(id),
                Err(e) => {
                    error!(job_id = %id, error = %e, "Job rejected");
                    summary.rejected.push((id, e.to_string()));
                }
            }
        }
        info!(
            registered = summary.registered.len(),
            rejected = summary.rejected.len(),
            "Jobs loaded"
        );
        Ok(summary)
    }

    /// Register a job and start its timer.
    ///
    /// # Arguments
    ///
    /// * `config` - Job to register; `config.id` must not be registered yet
    ///
    /// # Returns
    ///
    /// The job id, or a [`ScheduleError`] if the cadence does not parse or
    /// the id is taken. A rejected job is not stored.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let id = scheduler.add_job(config).await?;
    /// assert_eq!(scheduler.get_job(&id).await?.status, JobStatus::Stopped);
    /// ```
    pub async fn add_job(&self, config: JobConfig) -> Result<JobId, ScheduleError> {
        let fire = self.fire_fn(config.id.clone());
        self.inner.registry.add(config, fire).await
    }

    /// Unregister a job. Its future firings are cancelled; a firing already
    /// running completes.
    pub async fn remove_job(&self, id: &str) -> Result<(), NotFoundError> {
        self.inner.registry.remove(id).await
    }

    pub async fn list_jobs(&self) -> Vec<JobView> {
        self.inner.registry.list().await
    }

    pub async fn get_job(&self, id: &str) -> Result<JobView, NotFoundError> {
        self.inner.registry.get(id).await
    }

    /// Fire a job now, outside its cadence.
    pub async fn run_now(&self, id: &str) -> Result<JoinHandle<FiringOutcome>, NotFoundError> {
        self.inner.registry.config(id).await?;
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        info!(job_id = %id, "Manual firing requested");
        Ok(tokio::spawn(async move { inner.run_firing(&id).await }))
    }

    /// Stop every timer and forget every job. Firings already running finish.
    pub async fn shutdown(&self) {
        let cancelled = self.inner.registry.clear().await;
        info!(cancelled, "Scheduler shut down");
    }

    /// Timer callback for `id`. Holds only a weak reference so a dropped
    /// scheduler does not keep firing.
    fn fire_fn(&self, id: JobId) -> FireFn {
        let inner: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let id = id.clone();
            tokio::spawn(async move {
                inner.run_firing(&id).await;
            });
        })
    }
}

impl SchedulerInner {
    async fn run_firing(&self, id: &str) -> FiringOutcome {
        let Some(ticket) = self
            .registry
            .begin_firing(id, self.settings.overlap)
            .await
        else {
            return FiringOutcome::Skipped;
        };
        let config = ticket.config;
        let span = info_span!("firing", job_id = %id, source = %config.source.id);

        async {
            info!("Firing started");
            let t0 = Instant::now();
            let result = self.execute(&config, ticket.started_at).await;
            let elapsed_ms = t0.elapsed().as_millis() as u64;

            let (status, summary, outcome) = match result {
                Ok((records, report)) => {
                    info!(
                        records = records.len(),
                        delivered = report.delivered(),
                        failed = report.failed(),
                        elapsed_ms,
                        "Firing completed"
                    );
                    let summary = FiringSummary {
                        started_at: ticket.started_at,
                        finished_at: Utc::now(),
                        records: records.len(),
                        delivered: report.delivered(),
                        failed_deliveries: report.failed(),
                        error: None,
                    };
                    (
                        JobStatus::Completed,
                        summary,
                        FiringOutcome::Completed { records, report },
                    )
                }
                Err(e) => {
                    error!(error = %e, elapsed_ms, "Firing failed");
                    let summary = FiringSummary {
                        started_at: ticket.started_at,
                        finished_at: Utc::now(),
                        records: 0,
                        delivered: 0,
                        failed_deliveries: 0,
                        error: Some(e.to_string()),
                    };
                    (JobStatus::Error, summary, FiringOutcome::Failed(e))
                }
            };

            self.registry.finish_firing(id, status, summary).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        config: &JobConfig,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<(Vec<Record>, DistributionReport), PipelineError> {
        let document = self.gateway.fetch(&config.source).await?;
        let records = extract_records(&document, &config.source)?;

        if let Some(ref dir) = self.settings.archive_dir {
            if !records.is_empty() {
                if let Err(e) =
                    json::write_records(dir, &config.id, started_at, &config.source, &records).await
                {
                    warn!(error = %e, "Archiving batch failed; continuing");
                }
            }
        }

        if records.is_empty() && !self.settings.send_empty_digest {
            info!("Nothing extracted; digest not sent");
            return Ok((records, DistributionReport::default()));
        }

        let report = distribute(
            self.notifier.as_ref(),
            &config.source.name,
            &records,
            &config.recipients,
        )
        .await;
        Ok((records, report))
    }
}
