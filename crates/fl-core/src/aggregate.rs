//! Per-subject aggregation of usage records.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Serialize, Serializer};

use crate::record::UsageRecord;
use crate::types::{AnalyticsError, SubjectKey};

/// Label of the remainder bucket produced by [`Aggregates::top_by_time`].
pub const OTHERS_LABEL: &str = "Others";

/// Rollup of every record sharing a subject key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupedAggregate {
    pub subject_key: SubjectKey,
    pub total_duration_seconds: u64,
    pub visit_count: u64,
    /// `total / visits`, rounded half-up to whole seconds.
    pub average_session_duration_seconds: u64,
}

impl GroupedAggregate {
    const fn empty(subject_key: SubjectKey) -> Self {
        Self {
            subject_key,
            total_duration_seconds: 0,
            visit_count: 0,
            average_session_duration_seconds: 0,
        }
    }
}

/// Aggregates keyed by subject, iterated in order of first appearance.
///
/// First-appearance order is what makes summary tie-breaks deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    entries: Vec<GroupedAggregate>,
    index: HashMap<String, usize>,
}

/// One slice of a ranked breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedShare {
    pub label: String,
    pub total_duration_seconds: u64,
}

impl Aggregates {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, subject_key: &str) -> Option<&GroupedAggregate> {
        self.index.get(subject_key).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupedAggregate> {
        self.entries.iter()
    }

    /// Sum of every aggregate's total.
    pub fn total_duration_seconds(&self) -> u64 {
        self.entries
            .iter()
            .map(|a| a.total_duration_seconds)
            .fold(0, u64::saturating_add)
    }

    /// The `limit` subjects with the most time, then an `"Others"` bucket
    /// holding the rest when it is non-zero.
    ///
    /// Equal totals keep first-appearance order.
    pub fn top_by_time(&self, limit: usize) -> Vec<RankedShare> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by_key(|a| Reverse(a.total_duration_seconds));

        let mut shares: Vec<RankedShare> = sorted
            .iter()
            .take(limit)
            .map(|a| RankedShare {
                label: a.subject_key.to_string(),
                total_duration_seconds: a.total_duration_seconds,
            })
            .collect();

        let others = sorted
            .iter()
            .skip(limit)
            .map(|a| a.total_duration_seconds)
            .fold(0, u64::saturating_add);
        if others > 0 {
            shares.push(RankedShare {
                label: OTHERS_LABEL.to_string(),
                total_duration_seconds: others,
            });
        }
        shares
    }
}

impl<'a> IntoIterator for &'a Aggregates {
    type Item = &'a GroupedAggregate;
    type IntoIter = std::slice::Iter<'a, GroupedAggregate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for Aggregates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Groups records by subject key.
///
/// Every record is validated before anything is accumulated, so a negative
/// duration fails the whole call without a partial result. The output is
/// rebuilt from scratch each call.
pub fn aggregate(records: &[UsageRecord]) -> Result<Aggregates, AnalyticsError> {
    if let Some(bad) = records.iter().find(|r| r.duration_seconds < 0) {
        return Err(AnalyticsError::InvalidDuration {
            subject_key: bad.subject_key.to_string(),
            duration_seconds: bad.duration_seconds,
        });
    }

    let mut aggregates = Aggregates::default();
    for record in records {
        let idx = if let Some(&idx) = aggregates.index.get(record.subject_key.as_str()) {
            idx
        } else {
            let idx = aggregates.entries.len();
            aggregates
                .entries
                .push(GroupedAggregate::empty(record.subject_key.clone()));
            aggregates
                .index
                .insert(record.subject_key.to_string(), idx);
            idx
        };

        let entry = &mut aggregates.entries[idx];
        entry.visit_count += 1;
        // Non-negative, checked above.
        entry.total_duration_seconds = entry
            .total_duration_seconds
            .saturating_add(record.duration_seconds.unsigned_abs());
    }

    for entry in &mut aggregates.entries {
        entry.average_session_duration_seconds =
            rounded_average(entry.total_duration_seconds, entry.visit_count);
    }

    Ok(aggregates)
}

/// `total / count` rounded half-up; 0 when `count` is 0.
const fn rounded_average(total: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    let quotient = total / count;
    let remainder = total % count;
    if remainder * 2 >= count {
        quotient + 1
    } else {
        quotient
    }
}
