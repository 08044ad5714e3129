use crate::aggregator::SectorAggregator;
use crate::loader::DatasetLoader;
use crate::models::{DashboardSnapshot, DataConfig, OverviewReport};
use crate::normalizer::FacilityNameNormalizer;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// A sector that could not be loaded and was left out of this run.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSector {
    pub sector: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub snapshot: DashboardSnapshot,
    pub skipped_sectors: Vec<SkippedSector>,
    /// Sector key -> rows excluded for an empty facility name.
    pub skipped_rows: BTreeMap<String, usize>,
}

impl PipelineOutcome {
    pub fn loaded_sectors(&self) -> usize {
        self.snapshot.sectors.len()
    }

    pub fn total_skipped_rows(&self) -> usize {
        self.skipped_rows.values().sum()
    }
}

/// One processing run: load each sector, aggregate it, and roll everything up
/// into a fresh snapshot. Sectors that fail to load are skipped and reported.
pub fn run_pipeline(
    loader: &mut dyn DatasetLoader,
    sectors: &[String],
    normalizer: &FacilityNameNormalizer,
    timestamp: DateTime<Utc>,
) -> PipelineOutcome {
    let aggregator = SectorAggregator::new(normalizer);
    let mut sector_reports = BTreeMap::new();
    let mut skipped_sectors = Vec::new();
    let mut skipped_rows = BTreeMap::new();

    for sheet in sectors {
        info!("🔍 Processing {}...", sheet);
        let records = match loader.load(sheet) {
            Ok(records) => records,
            Err(e) => {
                warn!("   ❌ Skipping {}: {}", sheet, e);
                skipped_sectors.push(SkippedSector {
                    sector: sheet.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        info!("   ✅ Loaded {} rows from {}", records.len(), sheet);

        let key = DataConfig::sector_key(sheet);
        let outcome = aggregator.aggregate_sector(records);
        if outcome.skipped_rows > 0 {
            warn!(
                "   ⚠️  Skipped {} rows with empty facility name in {}",
                outcome.skipped_rows, sheet
            );
        }
        info!("   🏥 {} facilities in {}", outcome.report.facilities.len(), key);

        skipped_rows.insert(key.clone(), outcome.skipped_rows);
        sector_reports.insert(key, outcome.report);
    }

    let overview = OverviewReport::from_sectors(sector_reports.values());

    PipelineOutcome {
        snapshot: DashboardSnapshot {
            last_updated: timestamp,
            sectors: sector_reports,
            overview,
        },
        skipped_sectors,
        skipped_rows,
    }
}
