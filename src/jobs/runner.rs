use chrono::{Local, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{ActiveWindow, Job, JobState, RunOutcome};
use crate::config::ScheduleConfig;

struct Slot {
    job: Arc<dyn Job>,
    running: AtomicBool,
}

impl Slot {
    fn state(&self) -> JobState {
        if self.running.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        }
    }
}

/// Clears the running flag when the job's task ends, however it ends.
struct FlightGuard(Arc<Slot>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Owns the scheduled jobs. Clones share the same jobs and single-flight
/// state, so a clone can trigger a job the scheduler is also driving.
#[derive(Clone)]
pub struct JobRunner {
    slots: Vec<Arc<Slot>>,
    interval: Duration,
    window: Option<ActiveWindow>,
    run_on_start: bool,
}

impl JobRunner {
    pub fn new(jobs: Vec<Arc<dyn Job>>, interval: Duration) -> Self {
        Self {
            slots: jobs
                .into_iter()
                .map(|job| {
                    Arc::new(Slot {
                        job,
                        running: AtomicBool::new(false),
                    })
                })
                .collect(),
            interval,
            window: None,
            run_on_start: true,
        }
    }

    pub fn from_config(jobs: Vec<Arc<dyn Job>>, schedule: &ScheduleConfig) -> Self {
        Self::new(jobs, schedule.interval())
            .with_window(ActiveWindow::from_config(schedule))
            .run_on_start(schedule.run_on_start)
    }

    pub fn with_window(mut self, window: Option<ActiveWindow>) -> Self {
        self.window = window;
        self
    }

    /// Whether the first tick fires immediately on start or one interval later.
    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.job.name()).collect()
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.slot(name).map(|s| s.state())
    }

    /// Run one job now. `None` if no job has that name.
    pub async fn trigger(&self, name: &str) -> Option<RunOutcome> {
        let slot = Arc::clone(self.slot(name)?);
        Some(run_slot(slot).await)
    }

    /// Run every job once, concurrently, and wait for all of them.
    pub async fn run_all(&self) -> Vec<(&'static str, RunOutcome)> {
        let handles: Vec<_> = self
            .slots
            .iter()
            .map(|slot| (slot.job.name(), tokio::spawn(run_slot(Arc::clone(slot)))))
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| RunOutcome::Failed {
                error: e.to_string(),
            });
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Spawn the scheduler. Runs continue until [`JobRunnerHandle::stop`].
    pub fn start(&self) -> JobRunnerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let runner = self.clone();

        info!(
            "Starting job runner ({}) every {:?}",
            runner.job_names().join(", "),
            runner.interval
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(runner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            if !runner.run_on_start {
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => runner.dispatch(Local::now().time()),
                    _ = stop_rx.changed() => break,
                }
            }

            info!("Job runner stopped");
        });

        JobRunnerHandle { stop_tx, task }
    }

    fn dispatch(&self, now: NaiveTime) {
        if let Some(window) = self.window {
            if !window.contains(now) {
                info!("Outside hours of operation, skipping this cycle");
                return;
            }
        }

        for slot in &self.slots {
            tokio::spawn(run_slot(Arc::clone(slot)));
        }
    }

    fn slot(&self, name: &str) -> Option<&Arc<Slot>> {
        self.slots.iter().find(|s| s.job.name() == name)
    }
}

async fn run_slot(slot: Arc<Slot>) -> RunOutcome {
    let name = slot.job.name();

    if slot
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!("Job {} still running, skipping", name);
        return RunOutcome::Skipped;
    }
    let guard = FlightGuard(Arc::clone(&slot));

    info!("Job {} started", name);
    let started = Instant::now();

    // The flag clears when the job's task ends, not when this future is
    // dropped. Panics stay inside that task.
    let job = Arc::clone(&slot.job);
    let task = tokio::spawn(async move {
        let _guard = guard;
        job.run().await
    });
    match task.await {
        Ok(Ok(summary)) => {
            let elapsed = started.elapsed();
            info!("Job {} completed in {:.1?}: {}", name, elapsed, summary);
            RunOutcome::Completed { summary, elapsed }
        }
        Ok(Err(e)) => {
            error!("Job {} failed: {:#}", name, e);
            RunOutcome::Failed {
                error: format!("{:#}", e),
            }
        }
        Err(e) => {
            error!("Job {} aborted: {}", name, e);
            RunOutcome::Failed { error: e.to_string() }
        }
    }
}

/// Handle to a started scheduler.
pub struct JobRunnerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobRunnerHandle {
    /// Stop scheduling new runs. Runs already in flight finish on their own.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Job runner ended abnormally: {}", e);
        }
    }
}
