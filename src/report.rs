use crate::models::DashboardSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persists snapshots and summaries. Every write goes to a temporary file in
/// the target directory and is renamed into place, so readers only ever see a
/// complete previous or complete new file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshot_path: PathBuf,
    summary_path: PathBuf,
}

impl SnapshotStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            summary_path: summary_path.into(),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn persist(&self, snapshot: &DashboardSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)?;
        write_atomically(&self.snapshot_path, content.as_bytes())?;
        info!("💾 Dashboard data saved to {}", self.snapshot_path.display());
        Ok(())
    }

    pub fn write_summary(&self, snapshot: &DashboardSnapshot) -> Result<String> {
        let summary = render_summary(snapshot);
        write_atomically(&self.summary_path, summary.as_bytes())?;
        info!("📄 Summary report saved to {}", self.summary_path.display());
        Ok(summary)
    }

    /// `Ok(None)` when nothing has been persisted yet.
    pub fn load(&self) -> Result<Option<DashboardSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.snapshot_path)
            .with_context(|| format!("Failed to read {}", self.snapshot_path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.snapshot_path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    pub fn last_modified(&self) -> Option<DateTime<Local>> {
        let modified = fs::metadata(&self.snapshot_path).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }
}

pub fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(content)?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    Ok(())
}

/// Human-readable summary of a snapshot
pub fn render_summary(snapshot: &DashboardSnapshot) -> String {
    let overview = &snapshot.overview;
    let mut content = String::new();

    content.push_str("\nMHC RTO Dashboard Summary Report\n");
    content.push_str(&format!("Generated: {}\n", snapshot.last_updated.to_rfc3339()));
    content.push_str("============================================\n\n");

    content.push_str("OVERALL METRICS:\n");
    content.push_str(&format!(
        "- Total PHC Centers: {}\n\
         - Total Population At Risk: {}\n\
         - Total Communicated: {} ({}%)\n\
         - Total Accepted: {} ({}%)\n\
         - Total Enrolled: {} ({}%)\n\n",
        thousands(overview.total_phc_centers),
        thousands(overview.total_population),
        thousands(overview.total_communicated),
        overview.communication_rate,
        thousands(overview.total_accepted),
        overview.acceptance_rate,
        thousands(overview.total_enrolled),
        overview.enrollment_rate,
    ));

    content.push_str("COMMUNICATION BREAKDOWN:\n");
    content.push_str(&format!(
        "- Accepted: {}\n\
         - Refused: {}\n\
         - Wrong Number: {}\n\
         - No Response: {}\n\n",
        thousands(overview.total_accepted),
        thousands(overview.total_refused),
        thousands(overview.total_wrong_number),
        thousands(overview.total_no_response),
    ));

    content.push_str("VISIT TYPES:\n");
    content.push_str(&format!(
        "- In-Person Visits: {}\n\
         - Virtual Visits: {}\n\
         - Total Arrived: {}\n\n",
        thousands(overview.total_in_person),
        thousands(overview.total_virtual),
        thousands(overview.total_arrived),
    ));

    content.push_str("SECTOR BREAKDOWN:\n");
    for (sector_name, sector) in &snapshot.sectors {
        let totals = sector.totals();
        content.push_str(&format!(
            "- {}: {} PHCs, {} population, {} communicated ({}%), {} enrolled\n",
            title_case(sector_name),
            sector.facilities.len(),
            thousands(totals.total_population),
            thousands(totals.total_communicated),
            totals.communication_rate,
            thousands(totals.total_enrolled),
        ));
    }

    content
}

fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate_facility;
    use crate::models::{OverviewReport, Record, ResponseStatus, SectorReport};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn sample_snapshot() -> DashboardSnapshot {
        let records = vec![
            Record {
                identity_key: Some("1".to_string()),
                response: Some(ResponseStatus::Accepted),
                enrolled: true,
                ..Record::default()
            },
            Record::default(),
        ];
        let sector = SectorReport {
            facilities: vec![aggregate_facility("Al-Noor", &records)],
        };
        let overview = OverviewReport::from_sectors([&sector]);
        let mut sectors = BTreeMap::new();
        sectors.insert("western".to_string(), sector);
        DashboardSnapshot {
            last_updated: Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap(),
            sectors,
            overview,
        }
    }

    #[test]
    fn persisted_snapshot_uses_dashboard_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("dashboard_data.json"), dir.path().join("summary.txt"));
        store.persist(&sample_snapshot()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.snapshot_path()).unwrap()).unwrap();
        assert!(raw["last_updated"].is_string());
        assert_eq!(raw["sectors"]["western"][0]["phc_name"], "Al-Noor");
        assert_eq!(raw["sectors"]["western"][0]["total_population"], 2);
        assert_eq!(raw["overview"]["total_phc_centers"], 1);
        assert_eq!(raw["overview"]["communication_rate"], 50.0);

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, sample_snapshot());
    }

    #[test]
    fn persist_replaces_whole_file_and_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard_data.json");
        fs::write(&path, "{ stale").unwrap();

        let store = SnapshotStore::new(&path, dir.path().join("summary.txt"));
        store.persist(&sample_snapshot()).unwrap();

        assert!(store.load().unwrap().is_some());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn load_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("none.json"), dir.path().join("summary.txt"));
        assert!(store.load().unwrap().is_none());
        assert!(!store.exists());
        assert!(store.last_modified().is_none());
    }

    #[test]
    fn summary_lists_overview_and_sectors() {
        let summary = render_summary(&sample_snapshot());
        assert!(summary.contains("Total PHC Centers: 1"));
        assert!(summary.contains("Total Population At Risk: 2"));
        assert!(summary.contains("Total Communicated: 1 (50%)"));
        assert!(summary.contains("- Western: 1 PHCs, 2 population"));
    }

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(52308), "52,308");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
