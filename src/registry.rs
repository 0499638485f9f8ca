//! The table of active recurring jobs.
//!
//! [`ScheduleRegistry`] maps job ids to their configuration, run status and
//! timer. Reads (`list`, `get`) share a `tokio::sync::RwLock`; registration,
//! removal and status updates take it exclusively. No I/O ever happens while
//! the lock is held.
//!
//! Each job owns one timer task that sleeps until the next cadence tick and
//! invokes the job's fire callback. The tick the timer is waiting for is
//! published through a `watch` channel, so `next_run_at` is read from the
//! timer at call time rather than stored on the job. Dropping a job's entry
//! aborts its timer; firings already started are separate tasks and run to
//! completion.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cadence::Cadence;
use crate::errors::{NotFoundError, ScheduleError};
use crate::models::{FiringSummary, JobConfig, JobId, JobStatus, JobView};

/// Callback a timer invokes on every tick. It must not block; the scheduler
/// uses it to spawn the firing.
pub type FireFn = Arc<dyn Fn() + Send + Sync>;

/// Whether a job may start a firing while its previous one is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OverlapPolicy {
    /// Every tick starts a firing, even if the previous one is unfinished.
    #[default]
    Allow,
    /// A tick that arrives during an unfinished firing is skipped.
    Skip,
}

/// Handle on a job's timer task. Aborts the task when dropped.
struct TimerHandle {
    id: u64,
    task: JoinHandle<()>,
    next_fire: watch::Receiver<Option<DateTime<Utc>>>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct JobEntry {
    config: Arc<JobConfig>,
    status: JobStatus,
    last_run_at: Option<DateTime<Utc>>,
    last_firing: Option<FiringSummary>,
    in_flight: usize,
    timer: TimerHandle,
}

impl JobEntry {
    fn view(&self) -> JobView {
        JobView {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            cadence: self.config.cadence.clone(),
            source_id: self.config.source.id.clone(),
            source_name: self.config.source.name.clone(),
            status: self.status,
            last_run_at: self.last_run_at,
            next_run_at: *self.timer.next_fire.borrow(),
            schedule_handle: self.timer.id,
            last_firing: self.last_firing.clone(),
        }
    }
}

/// A firing that was admitted by [`ScheduleRegistry::begin_firing`].
#[derive(Debug, Clone)]
pub struct FiringTicket {
    pub config: Arc<JobConfig>,
    pub started_at: DateTime<Utc>,
}

/// Concurrent table of registered jobs and their timers.
pub struct ScheduleRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    next_handle: AtomicU64,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a job and start its timer.
    ///
    /// The cadence is validated before anything is stored; a rejected job
    /// leaves the registry untouched.
    pub async fn add(&self, config: JobConfig, fire: FireFn) -> Result<JobId, ScheduleError> {
        let cadence = Cadence::parse(&config.cadence)?;

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&config.id) {
            return Err(ScheduleError::DuplicateJob(config.id));
        }

        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let (next_tx, next_rx) = watch::channel(None);
        let task = tokio::spawn(run_timer(config.id.clone(), cadence, fire, next_tx));

        let id = config.id.clone();
        info!(job_id = %id, cadence = %config.cadence, source = %config.source.id, handle = handle_id, "Job registered");
        jobs.insert(
            id.clone(),
            JobEntry {
                config: Arc::new(config),
                status: JobStatus::Stopped,
                last_run_at: None,
                last_firing: None,
                in_flight: 0,
                timer: TimerHandle {
                    id: handle_id,
                    task,
                    next_fire: next_rx,
                },
            },
        );
        Ok(id)
    }

    /// Cancel a job's timer and forget the job.
    pub async fn remove(&self, id: &str) -> Result<(), NotFoundError> {
        let removed = self.jobs.write().await.remove(id);
        match removed {
            Some(entry) => {
                info!(job_id = %id, in_flight = entry.in_flight, "Job removed");
                Ok(())
            }
            None => Err(NotFoundError(id.to_string())),
        }
    }

    /// Snapshot of every job, ordered by id.
    pub async fn list(&self) -> Vec<JobView> {
        let jobs = self.jobs.read().await;
        let mut views: Vec<JobView> = jobs.values().map(JobEntry::view).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Snapshot of one job.
    pub async fn get(&self, id: &str) -> Result<JobView, NotFoundError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(JobEntry::view)
            .ok_or_else(|| NotFoundError(id.to_string()))
    }

    /// Configuration of a registered job.
    pub async fn config(&self, id: &str) -> Result<Arc<JobConfig>, NotFoundError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.config))
            .ok_or_else(|| NotFoundError(id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Mark a job as running and record the firing start as `last_run_at`.
    ///
    /// Returns `None` if the job is gone, or if `policy` is
    /// [`OverlapPolicy::Skip`] and a firing is still in flight.
    pub async fn begin_firing(&self, id: &str, policy: OverlapPolicy) -> Option<FiringTicket> {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(id) else {
            debug!(job_id = %id, "Firing for unregistered job ignored");
            return None;
        };
        if policy == OverlapPolicy::Skip && entry.in_flight > 0 {
            warn!(job_id = %id, in_flight = entry.in_flight, "Previous firing still running; skipping tick");
            return None;
        }

        let started_at = Utc::now();
        entry.status = JobStatus::Running;
        entry.last_run_at = Some(started_at);
        entry.in_flight += 1;
        Some(FiringTicket {
            config: Arc::clone(&entry.config),
            started_at,
        })
    }

    /// Record the end of a firing. A no-op if the job was removed meanwhile.
    pub async fn finish_firing(&self, id: &str, status: JobStatus, summary: FiringSummary) {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(entry) => {
                entry.status = status;
                entry.last_firing = Some(summary);
                entry.in_flight = entry.in_flight.saturating_sub(1);
            }
            None => debug!(job_id = %id, %status, "Job removed during firing; result dropped"),
        }
    }

    /// Remove every job and cancel every timer.
    pub async fn clear(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        jobs.clear();
        count
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep until each cadence tick and invoke `fire`. Missed ticks (the task
/// woke up late) are skipped rather than replayed.
async fn run_timer(
    job_id: JobId,
    cadence: Cadence,
    fire: FireFn,
    next_tx: watch::Sender<Option<DateTime<Utc>>>,
) {
    let mut anchor = Utc::now();
    loop {
        let now = Utc::now();
        let next = match cadence.next_after(anchor) {
            Some(next) if next >= now => Some(next),
            Some(_) => cadence.next_after(now),
            None => None,
        };
        let Some(next) = next else {
            next_tx.send_replace(None);
            info!(job_id = %job_id, "Cadence has no further ticks; timer stopped");
            return;
        };
        next_tx.send_replace(Some(next));

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        debug!(job_id = %job_id, tick = %next, "Timer fired");
        fire();
        anchor = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SelectorSchema, Source};
    use std::sync::atomic::AtomicUsize;

    fn config(id: &str, cadence: &str) -> JobConfig {
        JobConfig {
            id: id.to_string(),
            name: format!("job {id}"),
            cadence: cadence.to_string(),
            source: Source {
                id: "src".to_string(),
                name: "Source".to_string(),
                url: "https://example.com".to_string(),
                render_required: false,
                schema: SelectorSchema::new("div", "h3", "p", "img", "time", "a").unwrap(),
            },
            recipients: vec![],
        }
    }

    fn noop() -> FireFn {
        Arc::new(|| {})
    }

    fn summary() -> FiringSummary {
        FiringSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            records: 0,
            delivered: 0,
            failed_deliveries: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let registry = ScheduleRegistry::new();
        registry.add(config("b", "@every 1h"), noop()).await.unwrap();
        registry.add(config("a", "0 * * * *"), noop()).await.unwrap();

        let views = registry.list().await;
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, "a");
        assert_eq!(views[0].status, JobStatus::Stopped);
        assert_ne!(views[0].schedule_handle, views[1].schedule_handle);
    }

    #[tokio::test]
    async fn test_malformed_cadence_is_not_stored() {
        let registry = ScheduleRegistry::new();
        registry.add(config("ok", "@every 1h"), noop()).await.unwrap();

        let err = registry.add(config("bad", ""), noop()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCadence { .. }));
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let registry = ScheduleRegistry::new();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();
        let err = registry.add(config("a", "@every 2h"), noop()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicateJob(id) if id == "a"));
        assert_eq!(registry.get("a").await.unwrap().cadence, "@every 1h");
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let registry = ScheduleRegistry::new();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();
        assert_eq!(
            registry.remove("zzz").await.unwrap_err(),
            NotFoundError("zzz".to_string())
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_next_run_is_read_from_timer() {
        let registry = ScheduleRegistry::new();
        let before = Utc::now();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();
        // Let the timer task publish its first tick.
        tokio::task::yield_now().await;
        let mut next = None;
        for _ in 0..100 {
            next = registry.get("a").await.unwrap().next_run_at;
            if next.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let next = next.expect("timer published next tick");
        assert!(next > before + chrono::Duration::minutes(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_remove_cancels() {
        let registry = ScheduleRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let fire: FireFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });

        registry.add(config("a", "@every 1s"), fire).await.unwrap();
        rx.recv().await.unwrap();
        assert!(hits.load(Ordering::SeqCst) >= 1);

        registry.remove("a").await.unwrap();
        let seen = hits.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_firing_lifecycle() {
        let registry = ScheduleRegistry::new();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();

        let ticket = registry.begin_firing("a", OverlapPolicy::Allow).await.unwrap();
        let view = registry.get("a").await.unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert_eq!(view.last_run_at, Some(ticket.started_at));

        registry
            .finish_firing("a", JobStatus::Completed, summary())
            .await;
        let view = registry.get("a").await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.last_run_at, Some(ticket.started_at));
        assert!(view.last_firing.is_some());
    }

    #[tokio::test]
    async fn test_overlap_policy() {
        let registry = ScheduleRegistry::new();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();

        assert!(registry.begin_firing("a", OverlapPolicy::Skip).await.is_some());
        assert!(registry.begin_firing("a", OverlapPolicy::Skip).await.is_none());
        assert!(registry.begin_firing("a", OverlapPolicy::Allow).await.is_some());

        registry.finish_firing("a", JobStatus::Completed, summary()).await;
        registry.finish_firing("a", JobStatus::Completed, summary()).await;
        assert!(registry.begin_firing("a", OverlapPolicy::Skip).await.is_some());
    }

    #[tokio::test]
    async fn test_finish_after_remove_is_noop() {
        let registry = ScheduleRegistry::new();
        registry.add(config("a", "@every 1h"), noop()).await.unwrap();
        registry.begin_firing("a", OverlapPolicy::Allow).await.unwrap();
        registry.remove("a").await.unwrap();

        registry.finish_firing("a", JobStatus::Error, summary()).await;
        assert!(registry.is_empty().await);
        assert!(registry.begin_firing("a", OverlapPolicy::Allow).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_adds_and_reads() {
        let registry = Arc::new(ScheduleRegistry::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .add(config(&format!("job-{i}"), "@every 1h"), noop())
                    .await
                    .unwrap();
                registry.list().await.len()
            }));
        }
        for handle in handles {
            let seen = handle.await.unwrap();
            assert!((1..=50).contains(&seen));
        }
        let views = registry.list().await;
        assert_eq!(views.len(), 50);
        let mut ids: Vec<&str> = views.iter().map(|v| v.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let registry = ScheduleRegistry::new();
        for i in 0..3 {
            registry
                .add(config(&format!("j{i}"), "@every 1h"), noop())
                .await
                .unwrap();
        }
        assert_eq!(registry.clear().await, 3);
        assert!(registry.is_empty().await);
    }
}
