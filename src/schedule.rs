//! Auto-refresh schedule: a versioned on-disk schema, migration from the
//! older unversioned layouts, and the interval calculation the scheduler
//! uses to pick its next wake time.
//!
//! Migration rules (files without a `version` key):
//! - `simple_interval_minutes` present: version 2 layout. `mode` defaults to
//!   simple; `advanced_schedule` is kept when present.
//! - otherwise: version 1 layout. `interval_minutes` (default 120) becomes the
//!   simple interval and the mode is simple.
//! - `enabled` defaults to true in both.
//! - `last_refresh_time` stored as epoch seconds becomes a UTC timestamp.

use crate::report::write_atomically;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub const SCHEDULE_VERSION: u32 = 3;
const DEFAULT_SIMPLE_INTERVAL: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Simple,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSchedule {
    pub version: u32,
    pub enabled: bool,
    pub mode: ScheduleMode,
    pub simple_interval_minutes: u32,
    pub advanced_schedule: AdvancedSchedule,
    pub last_refresh_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSchedule {
    pub work_days: WorkDays,
    pub weekend_days: WeekendDays,
    /// IANA name, e.g. `Asia/Riyadh`.
    pub timezone: String,
}

/// Days are numbered 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkDays {
    pub days: Vec<u8>,
    pub work_hours: WorkHours,
    pub after_hours: AfterHours,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkHours {
    /// `HH:MM`, inclusive.
    pub start: String,
    /// `HH:MM`, inclusive.
    pub end: String,
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AfterHours {
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeekendDays {
    pub days: Vec<u8>,
    pub interval_minutes: u32,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            version: SCHEDULE_VERSION,
            enabled: true,
            mode: ScheduleMode::Advanced,
            simple_interval_minutes: DEFAULT_SIMPLE_INTERVAL,
            advanced_schedule: AdvancedSchedule::default(),
            last_refresh_time: None,
        }
    }
}

impl Default for AdvancedSchedule {
    fn default() -> Self {
        Self {
            work_days: WorkDays::default(),
            weekend_days: WeekendDays::default(),
            timezone: "Asia/Riyadh".to_string(),
        }
    }
}

impl Default for WorkDays {
    fn default() -> Self {
        Self {
            days: vec![0, 1, 2, 3, 4],
            work_hours: WorkHours::default(),
            after_hours: AfterHours::default(),
        }
    }
}

impl Default for WorkHours {
    fn default() -> Self {
        Self {
            start: "08:00".to_string(),
            end: "17:00".to_string(),
            interval_minutes: 10,
        }
    }
}

impl Default for AfterHours {
    fn default() -> Self {
        Self {
            interval_minutes: 180,
        }
    }
}

impl Default for WeekendDays {
    fn default() -> Self {
        Self {
            days: vec![5, 6],
            interval_minutes: 240,
        }
    }
}

/// Unversioned layouts written by earlier releases.
#[derive(Debug, Deserialize)]
struct LegacySchedule {
    enabled: Option<bool>,
    mode: Option<ScheduleMode>,
    simple_interval_minutes: Option<u32>,
    interval_minutes: Option<u32>,
    advanced_schedule: Option<AdvancedSchedule>,
    last_refresh_time: Option<f64>,
}

impl RefreshSchedule {
    /// Load from disk, migrating older layouts. Missing or unreadable files
    /// fall back to defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|content| {
                let value: Value = serde_json::from_str(&content)?;
                Self::from_json(value)
            });

        match parsed {
            Ok(schedule) => {
                info!(
                    "📅 Loaded auto-refresh settings: enabled={}, mode={:?}",
                    schedule.enabled, schedule.mode
                );
                schedule
            }
            Err(e) => {
                warn!("⚠️  Error loading auto-refresh settings, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomically(path, content.as_bytes())
    }

    pub fn from_json(value: Value) -> Result<Self> {
        match value.get("version").and_then(Value::as_u64) {
            Some(v) if v == u64::from(SCHEDULE_VERSION) => Ok(serde_json::from_value(value)?),
            Some(v) => bail!("unsupported schedule version {}", v),
            None => Ok(Self::migrate_legacy(serde_json::from_value(value)?)),
        }
    }

    fn migrate_legacy(legacy: LegacySchedule) -> Self {
        let (mode, simple_interval_minutes) = match legacy.simple_interval_minutes {
            Some(interval) => (legacy.mode.unwrap_or(ScheduleMode::Simple), interval),
            None => (
                ScheduleMode::Simple,
                legacy.interval_minutes.unwrap_or(DEFAULT_SIMPLE_INTERVAL),
            ),
        };

        let last_refresh_time = legacy.last_refresh_time.and_then(|secs| {
            let whole = secs.trunc() as i64;
            let nanos = (secs.fract() * 1e9) as u32;
            DateTime::from_timestamp(whole, nanos)
        });

        Self {
            version: SCHEDULE_VERSION,
            enabled: legacy.enabled.unwrap_or(true),
            mode,
            simple_interval_minutes,
            advanced_schedule: legacy.advanced_schedule.unwrap_or_default(),
            last_refresh_time,
        }
    }

    /// Minutes until the next refresh should run, as of `now`.
    pub fn current_interval_minutes(&self, now: DateTime<Utc>) -> u32 {
        let minutes = match self.mode {
            ScheduleMode::Simple => self.simple_interval_minutes,
            ScheduleMode::Advanced => self
                .advanced_interval(now)
                .unwrap_or(self.simple_interval_minutes),
        };
        minutes.max(1)
    }

    fn advanced_interval(&self, now: DateTime<Utc>) -> Option<u32> {
        let schedule = &self.advanced_schedule;
        let local = schedule.local_time(now);
        let weekday = local.weekday().num_days_from_sunday() as u8;

        if schedule.weekend_days.days.contains(&weekday) {
            return Some(schedule.weekend_days.interval_minutes);
        }

        if schedule.work_days.days.contains(&weekday) {
            let hours = &schedule.work_days.work_hours;
            let (start, end) = match (parse_clock(&hours.start), parse_clock(&hours.end)) {
                (Some(start), Some(end)) => (start, end),
                _ => {
                    warn!(
                        "⚠️  Invalid work hours {}-{}, using simple interval",
                        hours.start, hours.end
                    );
                    return None;
                }
            };
            let time = local.time();
            if start <= time && time <= end {
                return Some(hours.interval_minutes);
            }
            return Some(schedule.work_days.after_hours.interval_minutes);
        }

        // Day not configured
        None
    }

    /// Next planned refresh and the seconds remaining until it, counted from
    /// the last refresh when one is recorded.
    pub fn next_refresh(&self, now: DateTime<Utc>) -> (DateTime<Utc>, i64) {
        let interval = chrono::Duration::minutes(i64::from(self.current_interval_minutes(now)));
        let next = match self.last_refresh_time {
            Some(last) => last + interval,
            None => now + interval,
        };
        (next, (next - now).num_seconds().max(0))
    }
}

impl AdvancedSchedule {
    fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).naive_local(),
            Err(_) => {
                warn!("⚠️  Unknown timezone '{}', using host local time", self.timezone);
                now.with_timezone(&Local).naive_local()
            }
        }
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}
