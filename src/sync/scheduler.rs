//! Per-mapping sync scheduler with overlap prevention.
//!
//! Owns the set of periodic jobs and the `active_runs` set. For each mapping
//! at most one run is in flight at any instant, across periodic and manual
//! triggers: a tick that arrives while a run is active is dropped with a
//! warning, never queued. A global semaphore bounds how many runs execute in
//! parallel across mappings.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::SyncRunError;
use crate::models::mapping::Model as MappingModel;
use crate::repositories::RepoError;
use crate::repositories::mapping::MappingRepository;
use crate::sync::engine::{SyncEngine, SyncResult};

/// The runnable unit the scheduler drives. Implemented by the engine;
/// replaced by fakes in scheduler tests.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run_sync(
        &self,
        mapping_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncRunError>;
}

#[async_trait]
impl SyncRunner for SyncEngine {
    async fn run_sync(
        &self,
        mapping_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncRunError> {
        self.sync(mapping_id, &cancel).await
    }
}

struct Job {
    interval_minutes: i32,
    paused: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub active_runs: usize,
    pub accepting: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub scheduled: bool,
    pub paused: bool,
    pub running: bool,
}

pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    runner: Arc<dyn SyncRunner>,
    mappings: MappingRepository,
    config: SyncConfig,
    jobs: Mutex<HashMap<Uuid, Job>>,
    active_runs: Mutex<HashSet<Uuid>>,
    run_slots: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Fired first on shutdown: job loops exit, new triggers are refused.
    stop_accepting: CancellationToken,
    /// Fired after the drain grace: in-flight runs are asked to cancel.
    cancel_runs: CancellationToken,
}

/// Holding a slot is what makes a run "active"; dropping it releases the
/// mapping for the next trigger.
struct RunSlot {
    inner: Arc<SchedulerInner>,
    mapping_id: Uuid,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        lock(&self.inner.active_runs).remove(&self.mapping_id);
    }
}

impl SchedulerInner {
    /// Atomically claim the per-mapping run slot.
    fn try_claim(self: &Arc<Self>, mapping_id: Uuid) -> Option<RunSlot> {
        let mut active = lock(&self.active_runs);
        if active.insert(mapping_id) {
            Some(RunSlot {
                inner: self.clone(),
                mapping_id,
            })
        } else {
            None
        }
    }

    async fn execute(self: Arc<Self>, mapping_id: Uuid, slot: RunSlot, origin: &'static str) {
        let _slot = slot;

        let Ok(_permit) = self.run_slots.clone().acquire_owned().await else {
            return;
        };

        gauge!("sync_scheduler_active_runs").set(lock(&self.active_runs).len() as f64);
        let labels = vec![("origin", origin.to_string())];
        counter!("sync_scheduler_runs_total", &labels).increment(1);

        let cancel = self.cancel_runs.child_token();
        match self.runner.run_sync(mapping_id, cancel).await {
            Ok(result) => {
                info!(
                    %mapping_id,
                    origin,
                    status = result.status.as_str(),
                    inserted = result.inserted,
                    updated = result.updated,
                    deleted = result.deleted,
                    errors = result.errors,
                    "sync run completed"
                );
            }
            Err(e) => {
                error!(%mapping_id, origin, error = %e, "sync run failed to start");
            }
        }
    }

    fn spawn_job(
        self: &Arc<Self>,
        mapping_id: Uuid,
        initial_delay: Duration,
        interval: Duration,
        paused: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let inner = self.clone();

        tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = inner.stop_accepting.cancelled() => break,
                    _ = sleep(delay) => {}
                }
                delay = interval;

                if paused.load(Ordering::Relaxed) {
                    continue;
                }

                match inner.try_claim(mapping_id) {
                    Some(slot) => {
                        let run = inner.clone().execute(mapping_id, slot, "periodic");
                        inner.tracker.spawn(run);
                    }
                    None => {
                        // Coalesce: never queue a second run behind an
                        // in-flight one
                        warn!(%mapping_id, "sync already running, dropping periodic tick");
                        counter!("sync_scheduler_ticks_dropped_total").increment(1);
                    }
                }
            }
        })
    }
}

impl SyncScheduler {
    pub fn new(
        runner: Arc<dyn SyncRunner>,
        mappings: MappingRepository,
        config: SyncConfig,
    ) -> Self {
        let run_slots = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                runner,
                mappings,
                config,
                jobs: Mutex::new(HashMap::new()),
                active_runs: Mutex::new(HashSet::new()),
                run_slots,
                tracker: TaskTracker::new(),
                stop_accepting: CancellationToken::new(),
                cancel_runs: CancellationToken::new(),
            }),
        }
    }

    /// Load all enabled mappings and schedule them.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<usize, RepoError> {
        let mappings = self.inner.mappings.list_enabled().await?;
        let count = mappings.len();

        for mapping in &mappings {
            self.schedule(mapping);
        }

        info!(count, "scheduled enabled mappings");
        Ok(count)
    }

    /// Register (or replace) the periodic job for a mapping.
    pub fn schedule(&self, mapping: &MappingModel) {
        if !mapping.enabled {
            info!(mapping_id = %mapping.id, "mapping disabled, not scheduling");
            self.unschedule(mapping.id);
            return;
        }

        let interval_minutes = mapping.sync_interval_minutes.max(1);
        let interval = Duration::from_secs(u64::from(interval_minutes as u32) * 60);
        let initial_delay = initial_fire_delay(
            mapping.last_sync_at.map(|dt| dt.with_timezone(&Utc)),
            ChronoDuration::minutes(i64::from(interval_minutes)),
            Duration::from_secs(self.inner.config.startup_delay_secs),
            ChronoDuration::seconds(self.inner.config.misfire_grace_secs as i64),
            Utc::now(),
        );

        let paused = Arc::new(AtomicBool::new(false));
        let handle =
            self.inner
                .spawn_job(mapping.id, initial_delay, interval, paused.clone());

        let job = Job {
            interval_minutes,
            paused,
            handle,
        };

        let mut jobs = lock(&self.inner.jobs);
        if let Some(previous) = jobs.insert(mapping.id, job) {
            previous.handle.abort();
            info!(mapping_id = %mapping.id, "replaced existing sync job");
        }

        info!(
            mapping_id = %mapping.id,
            interval_minutes,
            first_fire_in_secs = initial_delay.as_secs(),
            "scheduled mapping"
        );
    }

    /// Remove the job for a mapping; no-op when absent.
    pub fn unschedule(&self, mapping_id: Uuid) {
        if let Some(job) = lock(&self.inner.jobs).remove(&mapping_id) {
            job.handle.abort();
            info!(%mapping_id, "unscheduled mapping");
        }
    }

    /// Stop firing without losing the job.
    pub fn pause(&self, mapping_id: Uuid) {
        if let Some(job) = lock(&self.inner.jobs).get(&mapping_id) {
            job.paused.store(true, Ordering::Relaxed);
            info!(%mapping_id, "paused sync job");
        }
    }

    pub fn resume(&self, mapping_id: Uuid) {
        if let Some(job) = lock(&self.inner.jobs).get(&mapping_id) {
            job.paused.store(false, Ordering::Relaxed);
            info!(%mapping_id, "resumed sync job");
        }
    }

    /// Run once, now, off-cycle. Returns false iff a run is already active
    /// for the mapping (or the scheduler is draining / mapping unusable).
    pub async fn trigger_manual(&self, mapping_id: Uuid) -> bool {
        if self.inner.stop_accepting.is_cancelled() {
            warn!(%mapping_id, "scheduler is shutting down, refusing manual trigger");
            return false;
        }

        match self.inner.mappings.get_by_id(mapping_id).await {
            Ok(Some(mapping)) if mapping.enabled => {}
            Ok(Some(_)) => {
                warn!(%mapping_id, "mapping is disabled, refusing manual trigger");
                return false;
            }
            Ok(None) => {
                warn!(%mapping_id, "mapping not found, refusing manual trigger");
                return false;
            }
            Err(e) => {
                error!(%mapping_id, error = %e, "failed to load mapping for manual trigger");
                return false;
            }
        }

        let Some(slot) = self.inner.try_claim(mapping_id) else {
            warn!(%mapping_id, "sync already running, manual trigger rejected");
            return false;
        };

        let run = self.inner.clone().execute(mapping_id, slot, "manual");
        self.inner.tracker.spawn(run);
        true
    }

    /// Trigger every enabled mapping; returns how many runs started.
    pub async fn trigger_manual_all(&self) -> usize {
        let mappings = match self.inner.mappings.list_enabled().await {
            Ok(mappings) => mappings,
            Err(e) => {
                error!(error = %e, "failed to list mappings for manual sync-all");
                return 0;
            }
        };

        let mut triggered = 0;
        for mapping in mappings {
            if self.trigger_manual(mapping.id).await {
                triggered += 1;
            }
        }

        info!(triggered, "manual sync-all dispatched");
        triggered
    }

    /// Remove jobs whose mapping no longer exists.
    pub async fn cleanup_orphans(&self) -> Result<usize, RepoError> {
        let existing: HashSet<Uuid> = self
            .inner
            .mappings
            .list_all()
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let orphaned: Vec<Uuid> = lock(&self.inner.jobs)
            .keys()
            .filter(|id| !existing.contains(id))
            .copied()
            .collect();

        for mapping_id in &orphaned {
            self.unschedule(*mapping_id);
        }

        if !orphaned.is_empty() {
            info!(count = orphaned.len(), "cleaned up orphaned sync jobs");
        }
        Ok(orphaned.len())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_jobs: lock(&self.inner.jobs).len(),
            active_runs: lock(&self.inner.active_runs).len(),
            accepting: !self.inner.stop_accepting.is_cancelled(),
        }
    }

    pub fn job_status(&self, mapping_id: Uuid) -> JobStatus {
        let jobs = lock(&self.inner.jobs);
        let job = jobs.get(&mapping_id);
        JobStatus {
            scheduled: job.is_some(),
            paused: job.is_some_and(|j| j.paused.load(Ordering::Relaxed)),
            running: lock(&self.inner.active_runs).contains(&mapping_id),
        }
    }

    /// Cooperative drain: stop accepting triggers, wait out the grace
    /// period, then cancel whatever is still in flight. Cancellation is only
    /// observed between adapter calls, so the final wait is bounded by the
    /// per-call timeouts.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.inner.stop_accepting.cancel();
        self.inner.tracker.close();

        let grace = Duration::from_secs(self.inner.config.shutdown_grace_secs);
        if timeout(grace, self.inner.tracker.wait()).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "in-flight runs exceeded shutdown grace, cancelling"
            );
            self.inner.cancel_runs.cancel();
            self.inner.tracker.wait().await;
        }

        for (_, job) in lock(&self.inner.jobs).drain() {
            job.handle.abort();
        }

        info!("scheduler stopped");
    }

    /// Configured interval for a scheduled mapping, if any.
    pub fn job_interval_minutes(&self, mapping_id: Uuid) -> Option<i32> {
        lock(&self.inner.jobs)
            .get(&mapping_id)
            .map(|j| j.interval_minutes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Delay until a job's first fire.
///
/// A never-synced or freshly due mapping fires after the startup delay. A
/// fire that was missed while the process was down still runs (after the
/// startup delay) when the miss is inside the grace window; older misses are
/// skipped and the job resumes its normal cadence. A mapping not yet due
/// fires at its due time, floored by the startup delay.
fn initial_fire_delay(
    last_sync_at: Option<DateTime<Utc>>,
    interval: ChronoDuration,
    startup_delay: Duration,
    misfire_grace: ChronoDuration,
    now: DateTime<Utc>,
) -> Duration {
    let Some(last) = last_sync_at else {
        return startup_delay;
    };

    let due = last + interval;
    if due <= now {
        let missed_by = now - due;
        if missed_by <= misfire_grace {
            startup_delay
        } else {
            interval.to_std().unwrap_or(startup_delay)
        }
    } else {
        let until_due = (due - now).to_std().unwrap_or(startup_delay);
        until_due.max(startup_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, hour, minute, 0).unwrap()
    }

    const STARTUP: Duration = Duration::from_secs(30);

    fn grace() -> ChronoDuration {
        ChronoDuration::seconds(300)
    }

    #[test]
    fn never_synced_fires_after_startup_delay() {
        let delay = initial_fire_delay(None, ChronoDuration::minutes(15), STARTUP, grace(), at(9, 0));
        assert_eq!(delay, STARTUP);
    }

    #[test]
    fn miss_within_grace_runs_on_startup() {
        // Due at 9:00, process comes up at 9:03
        let delay = initial_fire_delay(
            Some(at(8, 45)),
            ChronoDuration::minutes(15),
            STARTUP,
            grace(),
            at(9, 3),
        );
        assert_eq!(delay, STARTUP);
    }

    #[test]
    fn old_miss_is_skipped() {
        // Due at 9:00, process comes up at 10:30; resume the cadence instead
        let delay = initial_fire_delay(
            Some(at(8, 45)),
            ChronoDuration::minutes(15),
            STARTUP,
            grace(),
            at(10, 30),
        );
        assert_eq!(delay, Duration::from_secs(15 * 60));
    }

    #[test]
    fn not_yet_due_fires_at_due_time() {
        // Last sync 9:00, interval 15 min, now 9:05: due in 10 minutes
        let delay = initial_fire_delay(
            Some(at(9, 0)),
            ChronoDuration::minutes(15),
            STARTUP,
            grace(),
            at(9, 5),
        );
        assert_eq!(delay, Duration::from_secs(10 * 60));
    }

    #[test]
    fn due_soon_is_floored_by_startup_delay() {
        // Due in 5 seconds; the startup floor wins
        let delay = initial_fire_delay(
            Some(at(9, 0)),
            ChronoDuration::minutes(15),
            STARTUP,
            grace(),
            at(9, 14) + ChronoDuration::seconds(55),
        );
        assert_eq!(delay, STARTUP);
    }
}
