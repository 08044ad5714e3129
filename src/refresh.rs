use crate::errors::{FetchError, RefreshError};
use crate::fetcher::{DownloadedWorkbook, WorkbookFetcher};
use crate::loader::open_loader;
use crate::models::{Config, DashboardSnapshot};
use crate::normalizer::FacilityNameNormalizer;
use crate::pipeline::{run_pipeline, SkippedSector};
use crate::report::SnapshotStore;
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Who asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Manual,
    Admin,
    Scheduled,
    Startup,
    CacheClear,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshTrigger::Manual => "manual",
            RefreshTrigger::Admin => "admin",
            RefreshTrigger::Scheduled => "scheduled",
            RefreshTrigger::Startup => "startup",
            RefreshTrigger::CacheClear => "cache-clear",
        };
        f.write_str(name)
    }
}

impl RefreshTrigger {
    /// A cache clear ends any running cooldown instead of starting one.
    fn starts_cooldown(self) -> bool {
        !matches!(self, RefreshTrigger::CacheClear)
    }
}

#[derive(Debug)]
pub enum GateOutcome<T> {
    Completed(T),
    Failed(RefreshError),
    /// Another run holds the gate.
    InProgress,
    CoolingDown { remaining_secs: u64 },
}

/// Allows at most one refresh at a time and enforces a cooldown after each
/// successful run. Concurrent attempts are rejected, never queued.
pub struct RefreshGate {
    running: tokio::sync::Mutex<()>,
    last_success: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl RefreshGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            running: tokio::sync::Mutex::new(()),
            last_success: Mutex::new(None),
            cooldown,
        }
    }

    pub async fn run<T, F, Fut>(
        &self,
        trigger: RefreshTrigger,
        bypass_cooldown: bool,
        job: F,
    ) -> GateOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RefreshError>>,
    {
        let Ok(_guard) = self.running.try_lock() else {
            info!("⏳ {} refresh rejected: another refresh is in progress", trigger);
            return GateOutcome::InProgress;
        };

        if !bypass_cooldown {
            if let Some(remaining) = self.cooldown_remaining() {
                let remaining_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                info!("⏳ {} refresh rejected: cooling down for {}s", trigger, remaining_secs);
                return GateOutcome::CoolingDown { remaining_secs };
            }
        }

        info!("🔄 Starting {} refresh", trigger);
        match job().await {
            Ok(value) => {
                if let Ok(mut last) = self.last_success.lock() {
                    *last = trigger.starts_cooldown().then(Instant::now);
                }
                info!("✅ {} refresh completed", trigger);
                GateOutcome::Completed(value)
            }
            Err(e) => {
                error!("❌ {} refresh failed: {}", trigger, e);
                GateOutcome::Failed(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let last = (*self.last_success.lock().ok()?)?;
        self.cooldown.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub trigger: RefreshTrigger,
    /// Bytes in the source workbook, when it is a single file.
    pub file_size: Option<u64>,
    /// Unique people across the loaded sectors.
    pub total_population: u64,
    pub loaded_sectors: usize,
    pub skipped_sectors: Vec<SkippedSector>,
    pub skipped_rows: usize,
}

enum DataSource {
    Remote {
        primary: String,
        fallback: Option<String>,
    },
    Local(PathBuf),
}

impl DataSource {
    fn resolve(config: &Config) -> Result<Self, RefreshError> {
        if let Some(primary) = &config.remote.download_url {
            return Ok(DataSource::Remote {
                primary: primary.clone(),
                fallback: config
                    .remote
                    .fallback_url
                    .clone()
                    .filter(|f| !f.is_empty() && f != primary),
            });
        }
        let local = PathBuf::from(&config.data.local_workbook);
        if local.exists() {
            return Ok(DataSource::Local(local));
        }
        Err(RefreshError::NoSource)
    }
}

/// Everything one refresh needs: where to read from, where to write to.
pub struct RefreshJob<'a> {
    pub config: &'a Config,
    pub fetcher: &'a WorkbookFetcher,
    pub store: &'a SnapshotStore,
}

impl RefreshJob<'_> {
    /// Fetch, aggregate and persist. Nothing is written unless at least one
    /// sector loaded.
    pub async fn execute(
        &self,
        trigger: RefreshTrigger,
    ) -> Result<(DashboardSnapshot, RefreshReport), RefreshError> {
        // Step 1: Resolve and stage the source
        let (path, file_size, download) = match DataSource::resolve(self.config)? {
            DataSource::Remote { primary, fallback } => {
                let workbook = self.download_with_fallback(&primary, fallback.as_deref()).await?;
                (workbook.path().to_path_buf(), Some(workbook.size as u64), Some(workbook))
            }
            DataSource::Local(path) => {
                let size = if path.is_file() {
                    std::fs::metadata(&path).ok().map(|m| m.len())
                } else {
                    None
                };
                (path, size, None)
            }
        };

        // Step 2: Aggregate off the async runtime
        let sectors = self.config.data.sectors.clone();
        let prefixes = self.config.data.facility_prefixes.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut loader = open_loader(&path)?;
            let normalizer = FacilityNameNormalizer::new(prefixes);
            Ok::<_, crate::errors::LoadError>(run_pipeline(
                loader.as_mut(),
                &sectors,
                &normalizer,
                Utc::now(),
            ))
        })
        .await
        .map_err(|e| RefreshError::Task(e.to_string()))??;

        // Downloaded workbook is deleted here
        drop(download);

        if outcome.loaded_sectors() == 0 {
            return Err(RefreshError::NothingLoaded);
        }

        // Step 3: Persist
        self.store
            .persist(&outcome.snapshot)
            .map_err(RefreshError::Persist)?;
        if let Err(e) = self.store.write_summary(&outcome.snapshot) {
            warn!("⚠️  Could not write summary report: {:#}", e);
        }

        let report = RefreshReport {
            trigger,
            file_size,
            total_population: outcome.snapshot.overview.total_population,
            loaded_sectors: outcome.loaded_sectors(),
            skipped_rows: outcome.total_skipped_rows(),
            skipped_sectors: outcome.skipped_sectors,
        };
        Ok((outcome.snapshot, report))
    }

    async fn download_with_fallback(
        &self,
        primary: &str,
        fallback: Option<&str>,
    ) -> Result<DownloadedWorkbook, FetchError> {
        match self.fetcher.download(primary).await {
            Ok(workbook) => Ok(workbook),
            Err(e) => match fallback {
                Some(fallback) => {
                    warn!("⚠️  Primary download failed ({}), trying fallback URL", e);
                    self.fetcher.download(fallback).await
                }
                None => Err(e),
            },
        }
    }
}
