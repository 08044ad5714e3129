//! Identity resolution within one facility group.
//!
//! Records sharing a usable national ID are the same person no matter how the
//! other fields differ. Records without one are each counted as a distinct
//! person. Filtered counts are always resolved from scratch on the filtered
//! subset, never derived from the group total.

use crate::models::Record;
use std::collections::HashSet;

/// Minimal set of records representing distinct persons, first occurrence kept.
pub fn distinct_persons<'a, I>(records: I) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut persons = Vec::new();

    for record in records {
        match record.usable_identity_key() {
            Some(key) => {
                if seen_keys.insert(key) {
                    persons.push(record);
                }
            }
            // Unkeyed rows are never collapsed with each other
            None => persons.push(record),
        }
    }

    persons
}

/// Distinct identity keys plus unkeyed rows.
pub fn unique_person_count<'a, I>(records: I) -> u64
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut keys: HashSet<String> = HashSet::new();
    let mut unkeyed = 0u64;

    for record in records {
        match record.usable_identity_key() {
            Some(key) => {
                keys.insert(key);
            }
            None => unkeyed += 1,
        }
    }

    keys.len() as u64 + unkeyed
}

/// Filter first, then resolve the subset with the same keyed/unkeyed rule.
pub fn unique_person_count_where<P>(records: &[Record], predicate: P) -> u64
where
    P: Fn(&Record) -> bool,
{
    unique_person_count(records.iter().filter(|record| predicate(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseStatus;

    fn keyed(id: &str) -> Record {
        Record {
            identity_key: Some(id.to_string()),
            ..Record::default()
        }
    }

    fn unkeyed() -> Record {
        Record::default()
    }

    #[test]
    fn duplicate_keys_collapse_and_unkeyed_rows_stay_distinct() {
        let group = vec![keyed("A1"), keyed("A1"), unkeyed(), unkeyed()];
        assert_eq!(unique_person_count(&group), 3);
        assert_eq!(distinct_persons(&group).len(), 3);
    }

    #[test]
    fn blank_keys_count_as_unkeyed() {
        let group = vec![keyed(""), keyed("  "), keyed("B7"), keyed(" B7 ")];
        assert_eq!(unique_person_count(&group), 3);
    }

    #[test]
    fn same_key_with_different_fields_is_one_person() {
        let mut first = keyed("C3");
        first.response = Some(ResponseStatus::Refused);
        let mut second = keyed("C3");
        second.response = Some(ResponseStatus::Accepted);
        second.enrolled = true;

        let group = vec![first, second];
        assert_eq!(unique_person_count(&group), 1);
        let persons = distinct_persons(&group);
        assert_eq!(persons[0].response, Some(ResponseStatus::Refused));
    }

    #[test]
    fn unique_count_never_exceeds_row_count() {
        let group = vec![keyed("1"), keyed("2"), keyed("3"), unkeyed()];
        assert_eq!(unique_person_count(&group), group.len() as u64);

        let group = vec![keyed("1"), keyed("2"), keyed("1"), unkeyed()];
        assert!(unique_person_count(&group) < group.len() as u64);
    }

    #[test]
    fn filtered_counts_are_resolved_independently() {
        let mut accepted = keyed("D4");
        accepted.response = Some(ResponseStatus::Accepted);
        let mut refused = keyed("D4");
        refused.response = Some(ResponseStatus::Refused);

        let group = vec![accepted, refused];
        let total = unique_person_count(&group);
        let accepted_count =
            unique_person_count_where(&group, |r| r.has_response(&ResponseStatus::Accepted));
        let refused_count =
            unique_person_count_where(&group, |r| r.has_response(&ResponseStatus::Refused));

        // One person, but present in both categories.
        assert_eq!(total, 1);
        assert_eq!(accepted_count + refused_count, 2);
    }

    #[test]
    fn order_does_not_change_the_count() {
        let forward = vec![keyed("X"), unkeyed(), keyed("Y"), keyed("X"), unkeyed()];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(unique_person_count(&forward), unique_person_count(&reversed));
    }
}
