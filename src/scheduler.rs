use crate::context::AppContext;
use crate::refresh::{GateOutcome, RefreshTrigger};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running background refresh loop.
pub struct SchedulerHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to exit. Takes effect at the loop's next await point,
    /// including in the middle of a long sleep.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.task.is_finished()
    }

    pub async fn stop_and_wait(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!("⚠️  Scheduler task ended abnormally: {}", e);
        }
    }
}

pub fn spawn(ctx: Arc<AppContext>) -> SchedulerHandle {
    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(scheduler_loop(ctx, cancel_token.clone()));
    SchedulerHandle { cancel_token, task }
}

async fn scheduler_loop(ctx: Arc<AppContext>, cancel_token: CancellationToken) {
    info!("⏰ Auto-refresh scheduler started");

    loop {
        let schedule = ctx.schedule();
        if !schedule.enabled {
            info!("⏰ Auto-refresh disabled, scheduler exiting");
            break;
        }

        // Recomputed every cycle so schedule edits apply on the next wake
        let minutes = schedule.current_interval_minutes(Utc::now());
        info!("⏰ Next automatic refresh in {} minutes", minutes);

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)) => {}
        }

        match ctx.refresh(RefreshTrigger::Scheduled, true).await {
            GateOutcome::Completed(report) => info!(
                "⏰ Automatic refresh done: {} people from {} sectors",
                report.total_population, report.loaded_sectors
            ),
            GateOutcome::InProgress => info!("⏰ Skipped automatic refresh, another run is active"),
            GateOutcome::CoolingDown { .. } => {}
            GateOutcome::Failed(e) => warn!("⏰ Automatic refresh failed: {}", e),
        }
    }

    info!("⏹️  Auto-refresh scheduler stopped");
}
