//! Per-item alert state machine.
//!
//! ```text
//! Dormant -> Armed -> Fired -> Suppressed
//!    ^                            |
//!    +---- due date change / clear +
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Where an item sits in the alert lifecycle as of the last evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPhase {
    /// No due date, due beyond the lead time, or already past due.
    Dormant,
    /// Inside the lead window with nothing recorded. Reported between ticks,
    /// after a snooze or a cleared suppression; the next tick fires it.
    Armed,
    /// Fired during the last evaluation.
    Fired,
    /// Already alerted or dismissed for the current due date.
    Suppressed,
}

impl AlertPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::Armed => "armed",
            Self::Fired => "fired",
            Self::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the monitor remembers about an item between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertEntry {
    /// The due date this entry was recorded against.
    pub due_at: DateTime<Utc>,
    /// `None` when the entry came from a dismissal rather than an alert.
    pub last_alerted_at: Option<DateTime<Utc>>,
}

impl AlertEntry {
    pub const fn fired(due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            due_at,
            last_alerted_at: Some(now),
        }
    }

    pub const fn dismissed(due_at: DateTime<Utc>) -> Self {
        Self {
            due_at,
            last_alerted_at: None,
        }
    }
}

/// Whether `due_at` is inside the lead window: `now < due_at <= now + lead`.
pub fn in_lead_window(due_at: DateTime<Utc>, now: DateTime<Utc>, lead_time: Duration) -> bool {
    due_at > now && due_at <= now + lead_time
}

/// The phase an item is in at `now`, without recording anything.
///
/// Never returns [`AlertPhase::Fired`]; an item that [`step`] would fire
/// reports [`AlertPhase::Armed`]. An entry for a different due date counts as
/// no entry.
pub fn phase_at(
    entry: Option<&AlertEntry>,
    due_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lead_time: Duration,
) -> AlertPhase {
    let Some(due_at) = due_at else {
        return AlertPhase::Dormant;
    };
    if due_at <= now {
        AlertPhase::Dormant
    } else if entry.is_some_and(|e| e.due_at == due_at) {
        AlertPhase::Suppressed
    } else if in_lead_window(due_at, now, lead_time) {
        AlertPhase::Armed
    } else {
        AlertPhase::Dormant
    }
}

/// Advances one item's state for the evaluation at `now`.
///
/// Returns [`AlertPhase::Fired`] exactly when the caller must emit an alert;
/// `entry` has then already been recorded.
pub fn step(
    entry: &mut Option<AlertEntry>,
    due_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lead_time: Duration,
) -> AlertPhase {
    let Some(due_at) = due_at else {
        *entry = None;
        return AlertPhase::Dormant;
    };

    // A moved due date re-arms.
    if entry.is_some_and(|e| e.due_at != due_at) {
        *entry = None;
    }

    match phase_at(entry.as_ref(), Some(due_at), now, lead_time) {
        AlertPhase::Armed => {
            *entry = Some(AlertEntry::fired(due_at, now));
            AlertPhase::Fired
        }
        phase => phase,
    }
}
