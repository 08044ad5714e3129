//! Count verification across sectors.
//!
//! Compares raw row counts, per-sector unique national IDs and the global
//! unique count. The figures are informational; the dashboard pipeline keeps
//! its own per-facility counting and never reads them back.

use crate::loader::DatasetLoader;
use crate::models::Record;
use crate::normalizer::FacilityNameNormalizer;
use crate::pipeline::SkippedSector;
use std::collections::{HashMap, HashSet};

const TOP_FACILITIES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SectorDiagnostics {
    pub sector: String,
    pub raw_rows: usize,
    pub empty_facility_rows: usize,
    pub facilities: usize,
    pub unique_identity_keys: usize,
    pub duplicate_identity_rows: usize,
    pub empty_identity_rows: usize,
    /// Keys already seen in an earlier sector.
    pub cross_sector_keys: usize,
    pub top_facilities: Vec<(String, usize)>,
}

impl SectorDiagnostics {
    pub fn processed_rows(&self) -> usize {
        self.raw_rows - self.empty_facility_rows
    }
}

#[derive(Debug, Clone, Default)]
pub struct CountVerification {
    pub sectors: Vec<SectorDiagnostics>,
    pub unavailable: Vec<SkippedSector>,
    pub global_unique_keys: usize,
}

impl CountVerification {
    pub fn total_rows(&self) -> usize {
        self.sectors.iter().map(|s| s.raw_rows).sum()
    }

    pub fn total_processed_rows(&self) -> usize {
        self.sectors.iter().map(|s| s.processed_rows()).sum()
    }

    pub fn sum_of_sector_unique_keys(&self) -> usize {
        self.sectors.iter().map(|s| s.unique_identity_keys).sum()
    }

    pub fn render(&self) -> String {
        let mut content = String::new();
        content.push_str("🔍 POPULATION COUNT VERIFICATION\n");
        content.push_str("============================================================\n");

        for sector in &self.sectors {
            content.push_str(&format!("\n📍 {}\n", sector.sector.to_uppercase()));
            content.push_str(&format!("  📊 Total rows: {}\n", sector.raw_rows));
            content.push_str(&format!("  ❌ Rows with empty facility name: {}\n", sector.empty_facility_rows));
            content.push_str(&format!("  ✅ Rows processed: {}\n", sector.processed_rows()));
            content.push_str(&format!("  🏥 Facilities found: {}\n", sector.facilities));
            content.push_str(&format!("  🆔 Unique national IDs: {}\n", sector.unique_identity_keys));
            content.push_str(&format!("  🔄 Duplicate national ID rows: {}\n", sector.duplicate_identity_rows));
            content.push_str(&format!("  ❓ Empty national IDs: {}\n", sector.empty_identity_rows));
            if sector.cross_sector_keys > 0 {
                content.push_str(&format!(
                    "  🚨 {} national IDs also appear in an earlier sector\n",
                    sector.cross_sector_keys
                ));
            }
            if !sector.top_facilities.is_empty() {
                content.push_str("  Top facilities by rows:\n");
                for (name, rows) in &sector.top_facilities {
                    content.push_str(&format!("    • {}: {} rows\n", name, rows));
                }
            }
        }

        for skipped in &self.unavailable {
            content.push_str(&format!("\n⚠️  {} unavailable: {}\n", skipped.sector, skipped.reason));
        }

        content.push_str("\n📊 FINAL COMPARISON\n");
        content.push_str("============================================================\n");
        content.push_str(&format!("Total rows: {}\n", self.total_rows()));
        content.push_str(&format!("Rows with a facility name: {}\n", self.total_processed_rows()));
        content.push_str(&format!(
            "Sum of unique national IDs per sector: {}\n",
            self.sum_of_sector_unique_keys()
        ));
        content.push_str(&format!("Global unique national IDs: {}\n", self.global_unique_keys));
        content.push_str(&format!(
            "National IDs repeated across sectors: {}\n",
            self.sum_of_sector_unique_keys() - self.global_unique_keys
        ));
        content
    }
}

/// Walk every sector and gather row, identity and facility counts.
pub fn verify_counts(
    loader: &mut dyn DatasetLoader,
    sectors: &[String],
    normalizer: &FacilityNameNormalizer,
) -> CountVerification {
    let mut verification = CountVerification::default();
    let mut global_keys: HashSet<String> = HashSet::new();

    for sheet in sectors {
        match loader.load(sheet) {
            Ok(records) => {
                let diagnostics = sector_diagnostics(sheet, &records, normalizer, &global_keys);
                for record in &records {
                    if let Some(key) = record.usable_identity_key() {
                        global_keys.insert(key);
                    }
                }
                verification.sectors.push(diagnostics);
            }
            Err(e) => verification.unavailable.push(SkippedSector {
                sector: sheet.clone(),
                reason: e.to_string(),
            }),
        }
    }

    verification.global_unique_keys = global_keys.len();
    verification
}

fn sector_diagnostics(
    sheet: &str,
    records: &[Record],
    normalizer: &FacilityNameNormalizer,
    earlier_keys: &HashSet<String>,
) -> SectorDiagnostics {
    let mut sector_keys: HashSet<String> = HashSet::new();
    let mut keyed_rows = 0usize;
    let mut empty_identity_rows = 0usize;
    let mut facility_rows: HashMap<String, usize> = HashMap::new();
    let mut empty_facility_rows = 0usize;

    for record in records {
        match record.usable_identity_key() {
            Some(key) => {
                keyed_rows += 1;
                sector_keys.insert(key);
            }
            None => empty_identity_rows += 1,
        }

        let facility = normalizer.normalize(record.facility_source_name.as_deref());
        if facility.is_empty() {
            empty_facility_rows += 1;
        } else {
            *facility_rows.entry(facility).or_insert(0) += 1;
        }
    }

    let mut top_facilities: Vec<(String, usize)> = facility_rows.into_iter().collect();
    top_facilities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let facilities = top_facilities.len();
    top_facilities.truncate(TOP_FACILITIES);

    SectorDiagnostics {
        sector: sheet.to_string(),
        raw_rows: records.len(),
        empty_facility_rows,
        facilities,
        unique_identity_keys: sector_keys.len(),
        duplicate_identity_rows: keyed_rows - sector_keys.len(),
        empty_identity_rows,
        cross_sector_keys: sector_keys.intersection(earlier_keys).count(),
        top_facilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::StaticLoader;
    use std::collections::HashMap;

    fn row(facility: &str, id: Option<&str>) -> Record {
        Record {
            facility_source_name: Some(facility.to_string()),
            identity_key: id.map(|s| s.to_string()),
            ..Record::default()
        }
    }

    #[test]
    fn reports_within_and_cross_sector_duplicates() {
        let mut tables = HashMap::new();
        tables.insert(
            "western_sector".to_string(),
            vec![row("PHC A", Some("1")), row("PHC A", Some("1")), row("PHC B", None), row("", Some("2"))],
        );
        tables.insert(
            "eastern_sector".to_string(),
            vec![row("PHC C", Some("1")), row("PHC C", Some("3"))],
        );
        let mut loader = StaticLoader { sectors: tables };
        let sectors = vec![
            "western_sector".to_string(),
            "eastern_sector".to_string(),
            "northern_sector".to_string(),
        ];

        let verification = verify_counts(&mut loader, &sectors, &FacilityNameNormalizer::default());

        let west = &verification.sectors[0];
        assert_eq!(west.raw_rows, 4);
        assert_eq!(west.empty_facility_rows, 1);
        assert_eq!(west.processed_rows(), 3);
        assert_eq!(west.unique_identity_keys, 2);
        assert_eq!(west.duplicate_identity_rows, 1);
        assert_eq!(west.empty_identity_rows, 1);
        assert_eq!(west.top_facilities[0], ("A".to_string(), 2));

        let east = &verification.sectors[1];
        assert_eq!(east.cross_sector_keys, 1);

        assert_eq!(verification.unavailable.len(), 1);
        assert_eq!(verification.total_rows(), 6);
        assert_eq!(verification.sum_of_sector_unique_keys(), 4);
        assert_eq!(verification.global_unique_keys, 3);
        assert!(verification.render().contains("Global unique national IDs: 3"));
    }
}
