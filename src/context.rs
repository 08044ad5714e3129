use crate::fetcher::WorkbookFetcher;
use crate::models::{Config, DashboardSnapshot};
use crate::errors::RefreshError;
use crate::refresh::{GateOutcome, RefreshGate, RefreshJob, RefreshReport, RefreshTrigger};
use crate::report::SnapshotStore;
use crate::schedule::RefreshSchedule;
use crate::scheduler::{self, SchedulerHandle};
use crate::sessions::AdminSessions;
use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Shared state behind the HTTP handlers and the scheduler.
pub struct AppContext {
    pub config: Config,
    pub sessions: AdminSessions,
    pub gate: RefreshGate,
    pub fetcher: WorkbookFetcher,
    pub store: SnapshotStore,
    snapshot: RwLock<Option<Arc<DashboardSnapshot>>>,
    schedule: Mutex<RefreshSchedule>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl AppContext {
    /// Loads the persisted schedule (migrating old layouts) and the last
    /// persisted snapshot, if any.
    pub fn new(config: Config) -> Arc<Self> {
        let store = SnapshotStore::new(&config.data.snapshot_path, &config.data.summary_path);
        let snapshot = match store.load() {
            Ok(Some(snapshot)) => {
                info!("📊 Loaded dashboard data from {}", store.snapshot_path().display());
                Some(Arc::new(snapshot))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️  Ignoring unreadable dashboard data: {:#}", e);
                None
            }
        };
        let schedule = RefreshSchedule::load(&Self::schedule_path_of(&config));

        Arc::new(Self {
            sessions: AdminSessions::new(Duration::from_secs(
                config.admin.session_timeout_minutes * 60,
            )),
            gate: RefreshGate::new(Duration::from_secs(config.refresh.cooldown_seconds)),
            fetcher: WorkbookFetcher::new(Duration::from_secs(config.remote.timeout_secs)),
            store,
            snapshot: RwLock::new(snapshot),
            schedule: Mutex::new(schedule),
            scheduler: Mutex::new(None),
            config,
        })
    }

    fn schedule_path_of(config: &Config) -> PathBuf {
        PathBuf::from(&config.data.schedule_path)
    }

    pub fn snapshot(&self) -> Option<Arc<DashboardSnapshot>> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    fn set_snapshot(&self, snapshot: Option<DashboardSnapshot>) {
        if let Ok(mut current) = self.snapshot.write() {
            *current = snapshot.map(Arc::new);
        }
    }

    pub fn schedule(&self) -> RefreshSchedule {
        self.schedule
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Persist and apply a new schedule. The running scheduler is not touched;
    /// call [`AppContext::restart_scheduler`] for that.
    pub fn update_schedule(&self, schedule: RefreshSchedule) -> Result<()> {
        schedule.save(&Self::schedule_path_of(&self.config))?;
        if let Ok(mut current) = self.schedule.lock() {
            *current = schedule;
        }
        Ok(())
    }

    fn record_refresh_time(&self) {
        let mut schedule = self.schedule();
        schedule.last_refresh_time = Some(Utc::now());
        if let Err(e) = self.update_schedule(schedule) {
            warn!("⚠️  Could not save auto-refresh settings: {:#}", e);
        }
    }

    /// Run one refresh through the gate and publish the result.
    pub async fn refresh(
        &self,
        trigger: RefreshTrigger,
        bypass_cooldown: bool,
    ) -> GateOutcome<RefreshReport> {
        self.gate
            .run(trigger, bypass_cooldown, move || async move {
                let (snapshot, report) = self.rebuild(trigger).await?;
                self.set_snapshot(Some(snapshot));
                self.record_refresh_time();
                Ok(report)
            })
            .await
    }

    async fn rebuild(
        &self,
        trigger: RefreshTrigger,
    ) -> Result<(DashboardSnapshot, RefreshReport), RefreshError> {
        let job = RefreshJob {
            config: &self.config,
            fetcher: &self.fetcher,
            store: &self.store,
        };
        job.execute(trigger).await
    }

    /// Rebuild from the source, ignoring the cooldown. Only once that run
    /// succeeds are the cached and persisted snapshots replaced and the
    /// schedule reset to defaults; the gate ends the cooldown for this
    /// trigger. A failed or rejected run leaves all of them untouched.
    /// Returns the actions taken.
    pub async fn clear_and_reload(&self) -> (Vec<String>, GateOutcome<RefreshReport>) {
        let outcome = self
            .gate
            .run(RefreshTrigger::CacheClear, true, move || async move {
                let (snapshot, report) = self.rebuild(RefreshTrigger::CacheClear).await?;
                self.set_snapshot(Some(snapshot));

                let schedule = RefreshSchedule {
                    last_refresh_time: Some(Utc::now()),
                    ..RefreshSchedule::default()
                };
                let schedule_reset = match self.update_schedule(schedule) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("⚠️  Could not reset auto-refresh settings: {:#}", e);
                        false
                    }
                };
                Ok((report, schedule_reset))
            })
            .await;

        let mut actions = Vec::new();
        let outcome = match outcome {
            GateOutcome::Completed((report, schedule_reset)) => {
                actions.push("Fresh data loaded from source".to_string());
                actions.push("In-memory cache replaced".to_string());
                actions.push(format!("{} replaced", self.store.snapshot_path().display()));
                if schedule_reset {
                    actions.push("Auto-refresh settings reset to defaults".to_string());
                }
                actions.push("Refresh timer reset".to_string());
                GateOutcome::Completed(report)
            }
            GateOutcome::Failed(e) => GateOutcome::Failed(e),
            GateOutcome::InProgress => GateOutcome::InProgress,
            GateOutcome::CoolingDown { remaining_secs } => {
                GateOutcome::CoolingDown { remaining_secs }
            }
        };
        (actions, outcome)
    }

    /// Stop any running scheduler and start a new one if the schedule is
    /// enabled.
    pub fn restart_scheduler(self: &Arc<Self>) {
        let Ok(mut slot) = self.scheduler.lock() else {
            return;
        };
        if let Some(old) = slot.take() {
            old.stop();
        }
        if self.schedule().enabled {
            *slot = Some(scheduler::spawn(Arc::clone(self)));
        } else {
            info!("⏸️  Auto-refresh disabled");
        }
    }

    pub fn scheduler_active(&self) -> bool {
        self.scheduler
            .lock()
            .map(|slot| slot.as_ref().map(|h| h.is_active()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.stop_and_wait().await;
        }
    }
}
