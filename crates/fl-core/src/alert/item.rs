//! Alertable items and the alerts raised for them.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ItemId;

/// Something with an optional due date that can raise an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertableItem {
    pub id: ItemId,
    pub title: String,
    /// Items without a due date never alert.
    pub due_at: Option<DateTime<Utc>>,
}

/// A feed entry as the backend sends it (`{ _id, title, dueDate }`).
///
/// Kept loose so that one malformed entry can be reported without failing the
/// whole feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAlertableItem {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "dueDate", default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// A per-item problem found while evaluating a feed. Never aborts the tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("feed item has no id")]
    MissingId,

    #[error("item {item_id} has an unparseable due date {value:?}")]
    InvalidDueDate { item_id: ItemId, value: String },

    #[error("item {item_id} appears more than once in the feed")]
    DuplicateItem { item_id: ItemId },
}

impl ItemError {
    pub const fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::MissingId => None,
            Self::InvalidDueDate { item_id, .. } | Self::DuplicateItem { item_id } => Some(item_id),
        }
    }
}

impl RawAlertableItem {
    pub fn new(id: &str, title: &str, due_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            due_date: due_at.map(|d| d.to_rfc3339()),
            completed: false,
        }
    }

    /// Validates the entry. Blank due dates count as "no due date".
    pub fn parse(&self) -> Result<AlertableItem, ItemError> {
        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .and_then(|id| ItemId::new(id).ok())
            .ok_or(ItemError::MissingId)?;

        let due_at = match self.due_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(parse_due_date(value).ok_or_else(|| {
                ItemError::InvalidDueDate {
                    item_id: id.clone(),
                    value: value.to_string(),
                }
            })?),
        };

        Ok(AlertableItem {
            id,
            title: self.title.clone().unwrap_or_default(),
            due_at,
        })
    }
}

/// Parses RFC 3339, a naive date-time (taken as UTC), or a bare date (UTC midnight).
pub fn parse_due_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// How close an item is to its due date when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Urgent,
    Critical,
}

impl Severity {
    /// Critical within 5 minutes, urgent within 10.
    pub const fn from_minutes(minutes_until_due: i64) -> Self {
        if minutes_until_due <= 5 {
            Self::Critical
        } else if minutes_until_due <= 10 {
            Self::Urgent
        } else {
            Self::Warning
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The notification delivered to subscribers when an item fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub item_id: ItemId,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    /// Whole minutes remaining, rounded down.
    pub minutes_until_due: i64,
    pub severity: Severity,
}

impl Alert {
    pub(crate) fn new(
        item: &AlertableItem,
        due_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        let minutes_until_due = (due_at - fired_at).num_seconds().div_euclid(60);
        Self {
            item_id: item.id.clone(),
            title: item.title.clone(),
            due_at,
            fired_at,
            minutes_until_due,
            severity: Severity::from_minutes(minutes_until_due),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = if self.minutes_until_due == 1 {
            "minute"
        } else {
            "minutes"
        };
        write!(
            f,
            "[{}] \"{}\" is due in {} {unit}",
            self.severity, self.title, self.minutes_until_due
        )
    }
}
