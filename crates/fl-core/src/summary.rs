//! Whole-window rollup of aggregated usage.

use serde::Serialize;

use crate::aggregate::{Aggregates, GroupedAggregate};

/// Key reported when there is nothing to rank.
pub const NONE_KEY: &str = "None";

/// Top-level numbers for a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_time_seconds: u64,
    pub most_visited_key: String,
    pub most_time_spent_key: String,
    /// Total time over the raw record count (not over distinct subjects).
    pub average_session_duration_seconds: f64,
    pub total_record_count: usize,
}

impl Summary {
    /// The summary of an empty window.
    pub fn empty() -> Self {
        Self {
            total_time_seconds: 0,
            most_visited_key: NONE_KEY.to_string(),
            most_time_spent_key: NONE_KEY.to_string(),
            average_session_duration_seconds: 0.0,
            total_record_count: 0,
        }
    }
}

/// Derives the window summary from per-subject aggregates.
///
/// Ties for most visits or most time go to the subject seen first.
#[allow(clippy::cast_precision_loss)]
pub fn summarize(aggregates: &Aggregates, record_count: usize) -> Summary {
    if aggregates.is_empty() {
        return Summary {
            total_record_count: record_count,
            ..Summary::empty()
        };
    }

    let total_time_seconds = aggregates.total_duration_seconds();
    let most_visited = first_max_by(aggregates, |a| a.visit_count);
    let most_time_spent = first_max_by(aggregates, |a| a.total_duration_seconds);

    let average_session_duration_seconds = if record_count > 0 {
        total_time_seconds as f64 / record_count as f64
    } else {
        0.0
    };

    Summary {
        total_time_seconds,
        most_visited_key: most_visited
            .map_or_else(|| NONE_KEY.to_string(), |a| a.subject_key.to_string()),
        most_time_spent_key: most_time_spent
            .map_or_else(|| NONE_KEY.to_string(), |a| a.subject_key.to_string()),
        average_session_duration_seconds,
        total_record_count: record_count,
    }
}

/// Like `Iterator::max_by_key`, but keeps the first of equal maxima.
fn first_max_by<F>(aggregates: &Aggregates, key: F) -> Option<&GroupedAggregate>
where
    F: Fn(&GroupedAggregate) -> u64,
{
    aggregates.iter().fold(None, |best, candidate| match best {
        Some(current) if key(candidate) <= key(current) => Some(current),
        _ => Some(candidate),
    })
}
