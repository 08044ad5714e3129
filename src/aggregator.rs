use crate::models::{
    FacilityMetrics, OverviewReport, Record, ResponseStatus, SectorReport, VisitType,
};
use crate::normalizer::FacilityNameNormalizer;
use crate::resolver::{distinct_persons, unique_person_count_where};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SectorOutcome {
    pub report: SectorReport,
    /// Rows whose facility name normalized to nothing.
    pub skipped_rows: usize,
}

pub struct SectorAggregator<'a> {
    pub normalizer: &'a FacilityNameNormalizer,
}

impl<'a> SectorAggregator<'a> {
    pub fn new(normalizer: &'a FacilityNameNormalizer) -> Self {
        Self { normalizer }
    }

    /// Group a sector's rows by facility and compute metrics for each group
    pub fn aggregate_sector(&self, records: Vec<Record>) -> SectorOutcome {
        // Step 1: Group by normalized facility name, keeping first-encounter order
        let (groups, skipped_rows) = self.group_by_facility(records);

        // Step 2: Compute metrics per facility
        let mut facilities: Vec<FacilityMetrics> = groups
            .into_iter()
            .map(|(facility, records)| aggregate_facility(&facility, &records))
            .collect();

        // Step 3: Largest population first; sort_by is stable so ties keep encounter order
        facilities.sort_by(|a, b| b.total_population.cmp(&a.total_population));

        SectorOutcome {
            report: SectorReport { facilities },
            skipped_rows,
        }
    }

    fn group_by_facility(&self, records: Vec<Record>) -> (Vec<(String, Vec<Record>)>, usize) {
        let mut groups: Vec<(String, Vec<Record>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut skipped = 0usize;

        for record in records {
            let facility = self
                .normalizer
                .normalize(record.facility_source_name.as_deref());
            if facility.is_empty() {
                skipped += 1;
                continue;
            }

            match index.get(&facility) {
                Some(&position) => groups[position].1.push(record),
                None => {
                    index.insert(facility.clone(), groups.len());
                    groups.push((facility, vec![record]));
                }
            }
        }

        (groups, skipped)
    }
}

/// Fold one facility's rows into deduplicated counts and rates.
pub fn aggregate_facility(facility: &str, records: &[Record]) -> FacilityMetrics {
    let total_population = distinct_persons(records).len() as u64;
    let communicated = unique_person_count_where(records, |r| r.is_communicated());
    let accepted = unique_person_count_where(records, |r| r.has_response(&ResponseStatus::Accepted));
    let refused = unique_person_count_where(records, |r| r.has_response(&ResponseStatus::Refused));
    let wrong_number =
        unique_person_count_where(records, |r| r.has_response(&ResponseStatus::WrongNumber));
    let no_response =
        unique_person_count_where(records, |r| r.has_response(&ResponseStatus::NoResponse));
    let in_person_visits = unique_person_count_where(records, |r| r.has_visit(&VisitType::InPerson));
    let virtual_visits = unique_person_count_where(records, |r| r.has_visit(&VisitType::Virtual));
    let arrived = unique_person_count_where(records, |r| r.arrived);
    let enrolled = unique_person_count_where(records, |r| r.enrolled);

    FacilityMetrics {
        facility: facility.to_string(),
        total_population,
        communicated,
        accepted,
        refused,
        wrong_number,
        no_response,
        in_person_visits,
        virtual_visits,
        arrived,
        enrolled,
        acceptance_rate: rate(accepted, communicated, 1),
        enrollment_rate: rate(enrolled, accepted, 1),
        communication_rate: rate(communicated, total_population, 1),
    }
}

impl OverviewReport {
    /// Sum facility counts verbatim (no cross-facility deduplication) and
    /// recompute rates from the sums.
    pub fn from_facilities<'a, I>(facilities: I) -> Self
    where
        I: IntoIterator<Item = &'a FacilityMetrics>,
    {
        let mut overview = OverviewReport::default();

        for facility in facilities {
            overview.total_phc_centers += 1;
            overview.total_population += facility.total_population;
            overview.total_communicated += facility.communicated;
            overview.total_accepted += facility.accepted;
            overview.total_refused += facility.refused;
            overview.total_wrong_number += facility.wrong_number;
            overview.total_no_response += facility.no_response;
            overview.total_enrolled += facility.enrolled;
            overview.total_arrived += facility.arrived;
            overview.total_in_person += facility.in_person_visits;
            overview.total_virtual += facility.virtual_visits;
        }

        overview.communication_rate =
            rate(overview.total_communicated, overview.total_population, 2);
        overview.acceptance_rate = rate(overview.total_accepted, overview.total_communicated, 2);
        overview.enrollment_rate = rate(overview.total_enrolled, overview.total_accepted, 2);
        overview
    }

    pub fn from_sectors<'a, I>(sectors: I) -> Self
    where
        I: IntoIterator<Item = &'a SectorReport>,
    {
        Self::from_facilities(sectors.into_iter().flat_map(|s| s.facilities.iter()))
    }
}

impl SectorReport {
    pub fn totals(&self) -> OverviewReport {
        OverviewReport::from_facilities(&self.facilities)
    }
}

/// Percentage rounded to `places` decimals; 0 when the denominator is 0.
/// Capped at 100 because filtered subsets are resolved independently and a
/// numerator set is not guaranteed to be contained in its denominator set.
pub fn rate(numerator: u64, denominator: u64, places: i32) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let percent = (numerator as f64 / denominator as f64 * 100.0).min(100.0);
    round_to(percent, places)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(facility: &str, id: Option<&str>) -> Record {
        Record {
            facility_source_name: Some(facility.to_string()),
            identity_key: id.map(|s| s.to_string()),
            ..Record::default()
        }
    }

    fn with_response(mut record: Record, status: ResponseStatus) -> Record {
        record.response = Some(status);
        record
    }

    #[test]
    fn facility_population_uses_identity_resolution() {
        let records = vec![
            row("PHC A", Some("A1")),
            row("PHC A", Some("A1")),
            row("PHC A", None),
            row("PHC A", None),
        ];
        let metrics = aggregate_facility("A", &records);
        assert_eq!(metrics.total_population, 3);
        assert_eq!(metrics.communicated, 0);
        assert_eq!(metrics.communication_rate, 0.0);
        assert_eq!(metrics.acceptance_rate, 0.0);
        assert_eq!(metrics.enrollment_rate, 0.0);
    }

    #[test]
    fn facility_rates_round_to_one_decimal() {
        let records = vec![
            with_response(row("F", Some("1")), ResponseStatus::Accepted),
            with_response(row("F", Some("2")), ResponseStatus::Refused),
            with_response(row("F", Some("3")), ResponseStatus::NoResponse),
            row("F", Some("4")),
            row("F", Some("5")),
            row("F", Some("6")),
        ];
        let metrics = aggregate_facility("F", &records);
        assert_eq!(metrics.total_population, 6);
        assert_eq!(metrics.communicated, 3);
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.refused, 1);
        assert_eq!(metrics.no_response, 1);
        assert_eq!(metrics.acceptance_rate, 33.3);
        assert_eq!(metrics.communication_rate, 50.0);
    }

    #[test]
    fn visit_arrival_and_enrollment_counts_are_deduplicated() {
        let mut first = with_response(row("F", Some("9")), ResponseStatus::Accepted);
        first.visit_type = Some(VisitType::InPerson);
        first.arrived = true;
        first.enrolled = true;
        let second = first.clone();
        let mut third = with_response(row("F", None), ResponseStatus::Accepted);
        third.visit_type = Some(VisitType::Virtual);

        let metrics = aggregate_facility("F", &[first, second, third]);
        assert_eq!(metrics.in_person_visits, 1);
        assert_eq!(metrics.virtual_visits, 1);
        assert_eq!(metrics.arrived, 1);
        assert_eq!(metrics.enrolled, 1);
        assert_eq!(metrics.accepted, 2);
        assert_eq!(metrics.enrollment_rate, 50.0);
    }

    #[test]
    fn rates_stay_within_bounds() {
        assert_eq!(rate(0, 0, 1), 0.0);
        assert_eq!(rate(5, 0, 2), 0.0);
        assert_eq!(rate(3, 2, 1), 100.0);
        assert_eq!(rate(2, 3, 2), 66.67);
    }

    #[test]
    fn enrollment_rate_is_capped_when_enrolled_exceeds_accepted() {
        let mut enrolled_only = row("F", Some("1"));
        enrolled_only.enrolled = true;
        let mut also_enrolled = with_response(row("F", Some("2")), ResponseStatus::Accepted);
        also_enrolled.enrolled = true;
        let mut third = row("F", Some("3"));
        third.enrolled = true;

        let metrics = aggregate_facility("F", &[enrolled_only, also_enrolled, third]);
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.enrolled, 3);
        assert_eq!(metrics.enrollment_rate, 100.0);
    }

    #[test]
    fn sector_groups_by_normalized_name_and_sorts_stably() {
        let normalizer = FacilityNameNormalizer::default();
        let aggregator = SectorAggregator::new(&normalizer);
        let records = vec![
            row("PHC Beta.xlsx", Some("1")),
            row("PHC Alpha.xlsx", Some("2")),
            row("Alpha", Some("3")),
            row("PHC Gamma.xlsx", Some("4")),
            row("   ", Some("5")),
            Record::default(),
        ];

        let outcome = aggregator.aggregate_sector(records);
        let names: Vec<&str> = outcome
            .report
            .facilities
            .iter()
            .map(|f| f.facility.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(outcome.skipped_rows, 2);
        assert_eq!(outcome.report.facilities[0].total_population, 2);
    }

    #[test]
    fn same_identity_in_two_facilities_counts_once_per_facility() {
        let normalizer = FacilityNameNormalizer::default();
        let aggregator = SectorAggregator::new(&normalizer);
        let records = vec![row("PHC A", Some("X")), row("PHC B", Some("X"))];

        let outcome = aggregator.aggregate_sector(records);
        let overview = outcome.report.totals();
        assert_eq!(overview.total_population, 2);
        assert_eq!(overview.total_phc_centers, 2);
    }

    #[test]
    fn overview_sums_counts_and_rounds_rates_to_two_decimals() {
        let a = aggregate_facility(
            "A",
            &[
                with_response(row("A", Some("1")), ResponseStatus::Accepted),
                with_response(row("A", Some("2")), ResponseStatus::Refused),
                row("A", Some("3")),
            ],
        );
        let b = aggregate_facility(
            "B",
            &[with_response(row("B", Some("1")), ResponseStatus::WrongNumber)],
        );
        let sector = SectorReport {
            facilities: vec![a, b],
        };

        let overview = OverviewReport::from_sectors([&sector]);
        assert_eq!(overview.total_phc_centers, 2);
        assert_eq!(overview.total_population, 4);
        assert_eq!(overview.total_communicated, 3);
        assert_eq!(overview.total_wrong_number, 1);
        assert_eq!(overview.communication_rate, 75.0);
        assert_eq!(overview.acceptance_rate, 33.33);
        assert_eq!(overview.enrollment_rate, 0.0);
    }
}
