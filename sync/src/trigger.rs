//! Automatic sync triggers
//!
//! Hosts notify the scheduler about interesting moments (startup, data
//! edits, the tab becoming visible again, connectivity returning) and the
//! scheduler funnels them into single sync runs. Data-change notifications
//! are debounced so a burst of edits produces one run after the burst.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::engine::{SyncEngine, SyncOptions};

/// Why a sync run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit user action; bypasses the rate limit.
    Manual,
    /// The periodic timer fired.
    Interval,
    /// App startup with `sync_on_startup` enabled.
    Startup,
    /// The app window or tab became visible again.
    VisibilityRegained,
    /// Connectivity came back after being offline.
    Reconnected,
    /// A synced entity was created, updated, or deleted.
    DataChanged,
}

impl SyncTrigger {
    fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Interval => "interval",
            SyncTrigger::Startup => "startup",
            SyncTrigger::VisibilityRegained => "visibility",
            SyncTrigger::Reconnected => "reconnected",
            SyncTrigger::DataChanged => "data-changed",
        }
    }
}

/// Something that can execute one sync run for a trigger. The engine is the
/// production implementation; tests substitute a recorder.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, trigger: SyncTrigger);
}

#[async_trait]
impl SyncRunner for SyncEngine {
    async fn run(&self, trigger: SyncTrigger) {
        let options = SyncOptions {
            // a user-initiated sync should not be turned away for syncing
            // recently
            force: trigger == SyncTrigger::Manual,
            ..Default::default()
        };
        let result = self.perform_sync(options).await;
        if result.success {
            debug!(trigger = trigger.as_str(), "triggered sync finished");
        } else {
            warn!(
                trigger = trigger.as_str(),
                errors = result.errors.len(),
                "triggered sync failed"
            );
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Quiet window after a data change before syncing.
    pub debounce: Duration,
    /// Periodic sync interval, `None` to disable the timer.
    pub interval: Option<Duration>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            interval: None,
        }
    }
}

/// Serializes trigger notifications into sync runs on a background task.
pub struct SyncScheduler {
    sender: mpsc::UnboundedSender<SyncTrigger>,
    worker: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn spawn(runner: Arc<dyn SyncRunner>, config: TriggerConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        let timer = config.interval.map(|every| {
            let tick_sender = sender.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                // the immediate first tick would sync right at startup
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tick_sender.send(SyncTrigger::Interval).is_err() {
                        break;
                    }
                }
            })
        });

        let debounce = config.debounce;
        let worker = tokio::spawn(run_loop(runner, receiver, debounce));
        info!(
            debounce_ms = debounce.as_millis() as u64,
            interval = ?config.interval,
            "sync scheduler started"
        );

        Self {
            sender,
            worker,
            timer,
        }
    }

    /// Queue a trigger. Safe to call from any task; a stopped scheduler
    /// ignores it.
    pub fn notify(&self, trigger: SyncTrigger) {
        if self.sender.send(trigger).is_err() {
            warn!(trigger = trigger.as_str(), "sync scheduler is stopped");
        }
    }

    pub fn shutdown(self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        self.worker.abort();
        debug!("sync scheduler stopped");
    }
}

async fn run_loop(
    runner: Arc<dyn SyncRunner>,
    mut receiver: mpsc::UnboundedReceiver<SyncTrigger>,
    debounce: Duration,
) {
    while let Some(trigger) = receiver.recv().await {
        let mut effective = trigger;
        if trigger == SyncTrigger::DataChanged {
            // coalesce the burst; any stronger trigger cuts the wait short
            loop {
                match timeout(debounce, receiver.recv()).await {
                    Ok(Some(SyncTrigger::DataChanged)) => continue,
                    Ok(Some(other)) => {
                        effective = other;
                        break;
                    }
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
        }
        debug!(trigger = effective.as_str(), "running triggered sync");
        runner.run(effective).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::sleep;

    struct Recorder {
        runs: Mutex<Vec<SyncTrigger>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(Vec::new()),
            })
        }

        fn runs(&self) -> Vec<SyncTrigger> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncRunner for Recorder {
        async fn run(&self, trigger: SyncTrigger) {
            self.runs.lock().unwrap().push(trigger);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn data_change_burst_collapses_to_one_run() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(
            recorder.clone(),
            TriggerConfig {
                debounce: Duration::from_millis(500),
                interval: None,
            },
        );

        for _ in 0..5 {
            scheduler.notify(SyncTrigger::DataChanged);
        }
        sleep(Duration::from_secs(2)).await;

        assert_eq!(recorder.runs(), vec![SyncTrigger::DataChanged]);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_cuts_debounce_short() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(
            recorder.clone(),
            TriggerConfig {
                debounce: Duration::from_secs(60),
                interval: None,
            },
        );

        scheduler.notify(SyncTrigger::DataChanged);
        scheduler.notify(SyncTrigger::Manual);
        sleep(Duration::from_secs(1)).await;

        assert_eq!(recorder.runs(), vec![SyncTrigger::Manual]);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timer_fires_repeatedly() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(
            recorder.clone(),
            TriggerConfig {
                debounce: Duration::from_millis(10),
                interval: Some(Duration::from_secs(60)),
            },
        );

        sleep(Duration::from_secs(125)).await;

        let runs = recorder.runs();
        assert!(runs.len() >= 2, "expected at least two interval runs, got {runs:?}");
        assert!(runs.iter().all(|run| *run == SyncTrigger::Interval));
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_triggers_run_without_delay() {
        let recorder = Recorder::new();
        let scheduler =
            SyncScheduler::spawn(recorder.clone(), TriggerConfig::default());

        scheduler.notify(SyncTrigger::Startup);
        scheduler.notify(SyncTrigger::Reconnected);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            recorder.runs(),
            vec![SyncTrigger::Startup, SyncTrigger::Reconnected]
        );
        scheduler.shutdown();
    }
}
