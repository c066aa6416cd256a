//! # Task Scheduler
//!
//! Recurring background tasks. A [`TaskRunner`] takes a [`ScheduledTask`] and
//! decides when to invoke it; the bundled [`IntervalTaskRunner`] waits an
//! initial delay, then invokes the task every `frequency` plus jitter, bounding
//! each invocation by a timeout. All loops stop when the shutdown token fires.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, histogram};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ProviderConfig;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A named unit of recurring work. The task handles its own errors.
#[derive(Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub task: TaskFn,
}

impl ScheduledTask {
    pub fn new<F, Fut>(id: impl Into<String>, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: id.into(),
            task: Arc::new(move || Box::pin(task())),
        }
    }

    pub async fn invoke(&self) {
        (self.task)().await
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask").field("id", &self.id).finish()
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {id} is already scheduled")]
    AlreadyScheduled { id: String },
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Register `task`; returns once it is scheduled, not when it finishes.
    async fn run(&self, task: ScheduledTask) -> Result<(), SchedulerError>;
}

/// Timing for an [`IntervalTaskRunner`].
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    pub frequency: Duration,
    pub timeout: Duration,
    pub initial_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of `frequency`.
    pub jitter_pct_max: f64,
}

impl From<&ProviderConfig> for IntervalSchedule {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            frequency: Duration::from_secs(config.frequency_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
            initial_delay: Duration::from_secs(config.initial_delay_seconds),
            jitter_pct_max: config.jitter_pct_max,
        }
    }
}

pub struct IntervalTaskRunner {
    schedule: IntervalSchedule,
    shutdown: CancellationToken,
    scheduled: Mutex<HashSet<String>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IntervalTaskRunner {
    pub fn new(schedule: IntervalSchedule, shutdown: CancellationToken) -> Self {
        Self {
            schedule,
            shutdown,
            scheduled: Mutex::new(HashSet::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Cancel every loop and wait for in-flight invocations to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Scheduled task loop ended abnormally");
            }
        }
    }
}

#[async_trait]
impl TaskRunner for IntervalTaskRunner {
    async fn run(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        if !self.scheduled.lock().await.insert(task.id.clone()) {
            return Err(SchedulerError::AlreadyScheduled { id: task.id });
        }

        info!(
            task_id = %task.id,
            frequency_seconds = self.schedule.frequency.as_secs(),
            "Scheduling task"
        );
        let handle = tokio::spawn(run_loop(
            task,
            self.schedule.clone(),
            self.shutdown.clone(),
        ));
        self.handles.lock().await.push(handle);
        Ok(())
    }
}

#[instrument(skip_all, fields(task_id = %task.id))]
async fn run_loop(task: ScheduledTask, schedule: IntervalSchedule, shutdown: CancellationToken) {
    let mut delay = schedule.initial_delay;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Task loop shutdown requested");
                break;
            }
            _ = sleep(delay) => {
                let started = Instant::now();
                if timeout(schedule.timeout, task.invoke()).await.is_err() {
                    warn!(
                        timeout_seconds = schedule.timeout.as_secs(),
                        "Scheduled task timed out"
                    );
                    counter!("scheduler_task_timeouts_total", "task_id" => task.id.clone())
                        .increment(1);
                }
                histogram!("scheduler_task_duration_ms", "task_id" => task.id.clone())
                    .record(started.elapsed().as_secs_f64() * 1_000.0);

                let jitter = sample_jitter_seconds(&schedule);
                debug!(jitter_seconds = jitter, "Next invocation scheduled");
                delay = schedule.frequency + Duration::from_secs(jitter);
            }
        }
    }
}

fn sample_jitter_seconds(schedule: &IntervalSchedule) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(schedule, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(schedule: &IntervalSchedule, rng: &mut R) -> u64 {
    let max = schedule.jitter_pct_max.max(0.0);
    if max == 0.0 {
        return 0;
    }
    let jitter_pct = rng.gen_range(0.0..=max);
    (schedule.frequency.as_secs() as f64 * jitter_pct).round() as u64
}
