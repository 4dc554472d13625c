use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{AlertEngine, CycleReport, CyclePhase},
    ports::Clock,
};

/// Periodic driver for `AlertEngine::run_cycle`.
///
/// At most one cycle runs at a time. A trigger that arrives while a cycle is
/// in flight is dropped (and counted), never queued.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    engine: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    cycles_completed: u64,
    cycles_failed: u64,
    skipped_triggers: u64,
    last_report: Option<CycleReport>,
    last_error: Option<String>,
    last_finished_at: Option<DateTime<Utc>>,
}

pub enum TriggerOutcome {
    Started(JoinHandle<()>),
    /// A cycle is already running.
    Skipped,
    ShuttingDown,
}

#[derive(Clone, Debug)]
pub struct SchedulerStatus {
    pub interval: Duration,
    pub phase: CyclePhase,
    pub running: bool,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub skipped_triggers: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl PollingScheduler {
    pub fn new(engine: Arc<AlertEngine>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                engine,
                clock,
                interval,
                cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
                shutdown: CancellationToken::new(),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a cycle now unless one is already running.
    pub fn trigger(&self) -> TriggerOutcome {
        if self.inner.shutdown.is_cancelled() {
            return TriggerOutcome::ShuttingDown;
        }

        let Ok(guard) = self.inner.cycle_lock.clone().try_lock_owned() else {
            let skipped = {
                let mut st = self.state();
                st.skipped_triggers += 1;
                st.skipped_triggers
            };
            tracing::warn!(skipped, "previous cycle still running, trigger skipped");
            return TriggerOutcome::Skipped;
        };

        self.state().running = true;
        let running = RunningGuard(self.clone());
        let this = self.clone();
        TriggerOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            let _running = running;
            this.run_one().await;
        }))
    }

    async fn run_one(&self) {
        let res = self.inner.engine.run_cycle(&self.inner.shutdown).await;

        let mut st = self.state();
        st.running = false;
        st.last_finished_at = Some(self.inner.clock.now());
        match res {
            Ok(report) => {
                st.cycles_completed += 1;
                st.last_error = None;
                st.last_report = Some(report);
            }
            Err(e) => {
                tracing::error!("cycle aborted: {e}");
                st.cycles_failed += 1;
                st.last_error = Some(e.to_string());
            }
        }
    }

    /// Tick every `interval` (first tick immediately) until `shutdown`, then
    /// wait for the in-flight cycle to wind down.
    pub async fn run(&self) {
        let mut ticker = time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.inner.interval.as_secs(),
            "polling scheduler started"
        );

        loop {
            tokio::select! {
              _ = self.inner.shutdown.cancelled() => break,
              _ = ticker.tick() => {
                let _ = self.trigger();
              }
            }
        }

        let _idle = self.inner.cycle_lock.lock().await;
        tracing::info!("polling scheduler stopped");
    }

    /// Stop ticking and ask the running cycle to stop starting new work.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn status(&self) -> SchedulerStatus {
        let st = self.state();
        SchedulerStatus {
            interval: self.inner.interval,
            phase: self.inner.engine.phase(),
            running: st.running,
            cycles_completed: st.cycles_completed,
            cycles_failed: st.cycles_failed,
            skipped_triggers: st.skipped_triggers,
            last_report: st.last_report.clone(),
            last_error: st.last_error.clone(),
            last_finished_at: st.last_finished_at,
        }
    }
}

/// Marks a cycle that ended without reporting back (it panicked) as failed.
struct RunningGuard(PollingScheduler);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let finished_at = self.0.inner.clock.now();
        let mut st = self.0.state();
        if st.running {
            tracing::error!("cycle task ended without a result");
            st.running = false;
            st.cycles_failed += 1;
            st.last_error = Some("cycle panicked".to_string());
            st.last_finished_at = Some(finished_at);
        }
    }
}
