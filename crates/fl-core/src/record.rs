//! Usage records and normalization of backend payloads.
//!
//! The backend reports usage in several shapes (`domain`, `url`, `appName`,
//! keyed maps, wrapped arrays). Everything is funnelled through
//! [`resolve_subject_key`] into the canonical [`UsageRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::types::{ProductivityCategory, SubjectKey};

/// One observed interval of activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Domain (web) or application name (app).
    pub subject_key: SubjectKey,
    /// When the interval was observed or ended.
    pub timestamp: DateTime<Utc>,
    /// Length of the interval. Validated as non-negative during aggregation.
    pub duration_seconds: i64,
    /// Backend categorization, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ProductivityCategory>,
}

impl UsageRecord {
    pub const fn new(
        subject_key: SubjectKey,
        timestamp: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Self {
        Self {
            subject_key,
            timestamp,
            duration_seconds,
            category: None,
        }
    }

    #[must_use]
    pub const fn with_category(mut self, category: ProductivityCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// A usage record as the backend sends it. Fields beyond these are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUsageRecord {
    #[serde(default)]
    pub subject_key: Option<String>,
    #[serde(default, alias = "name")]
    pub app_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Seconds; a missing duration counts as zero.
    #[serde(default, alias = "totalDuration")]
    pub duration: Option<f64>,
    /// `null` upstream until the subject is first used.
    #[serde(default, alias = "lastUsed", alias = "startTime")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<String>,
}

impl RawUsageRecord {
    /// Converts into the canonical shape.
    ///
    /// `fallback_key` is used when the record names no subject of its own
    /// (the map key of a keyed payload).
    #[allow(clippy::cast_possible_truncation)]
    pub fn normalize(&self, fallback_key: Option<&str>) -> Result<UsageRecord, RecordDefect> {
        let timestamp = self.timestamp.ok_or(RecordDefect::MissingTimestamp)?;
        // `as` saturates, and JSON numbers are always finite.
        let duration_seconds = self.duration.unwrap_or(0.0).round() as i64;
        Ok(UsageRecord {
            subject_key: resolve_subject_key(self, fallback_key),
            timestamp,
            duration_seconds,
            category: self
                .category
                .as_deref()
                .map(ProductivityCategory::from_backend),
        })
    }
}

/// Resolves a record's subject key.
///
/// Fallback order: `subjectKey`, `appName`/`name`, `domain`, host parsed from
/// `url`, the caller's fallback, then `"unknown"`.
pub fn resolve_subject_key(raw: &RawUsageRecord, fallback_key: Option<&str>) -> SubjectKey {
    pick_subject_key(
        [&raw.subject_key, &raw.app_name, &raw.domain].map(Option::as_deref),
        raw.url.as_deref(),
        fallback_key,
    )
}

fn pick_subject_key(
    explicit: [Option<&str>; 3],
    url: Option<&str>,
    fallback_key: Option<&str>,
) -> SubjectKey {
    let explicit = explicit
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty());

    if let Some(key) = explicit {
        return SubjectKey::or_unknown(Some(key));
    }

    if let Some(host) = url.and_then(host_from_url) {
        return SubjectKey::or_unknown(Some(&host));
    }

    SubjectKey::or_unknown(fallback_key)
}

/// Best-effort subject for a record that failed to deserialize.
fn subject_hint(value: &Value, fallback_key: Option<&str>) -> SubjectKey {
    let field = |name: &str| value.get(name).and_then(Value::as_str);
    pick_subject_key(
        [
            field("subjectKey"),
            field("appName").or_else(|| field("name")),
            field("domain"),
        ],
        field("url"),
        fallback_key,
    )
}

/// Host of an absolute URL, as a WHATWG URL parser reports it.
///
/// Returns `None` when the URL does not parse or has no host.
pub fn host_from_url(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

/// Why a single usage record was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordDefect {
    #[error("missing timestamp (lastUsed)")]
    MissingTimestamp,
    #[error("{0}")]
    Malformed(String),
}

/// A record skipped while normalizing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("usage record #{position} ({subject_key}): {defect}")]
pub struct RejectedRecord {
    /// Zero-based position in the payload.
    pub position: usize,
    pub subject_key: SubjectKey,
    pub defect: RecordDefect,
}

/// Outcome of normalizing a payload: the good records and the dropped ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageBatch {
    pub records: Vec<UsageRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Any usage payload the backend is known to return.
///
/// The shape is chosen from the top-level JSON value; records are decoded one
/// at a time by [`into_batch`](Self::into_batch) so one bad record cannot sink
/// the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum UsagePayload {
    /// `[ {...}, {...} ]`
    List(Vec<Value>),
    /// `{ "appUsage": [ ... ], ... }`
    Wrapped(Vec<Value>),
    /// `{ "github.com": {...}, ... }`, iterated in key order.
    Keyed(BTreeMap<String, Value>),
}

impl<'de> Deserialize<'de> for UsagePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => Ok(Self::List(items)),
            Value::Object(mut map) => match map.remove("appUsage") {
                Some(Value::Array(items)) => Ok(Self::Wrapped(items)),
                Some(other) => Err(D::Error::custom(format!(
                    "appUsage must be an array, got {}",
                    json_kind(&other)
                ))),
                None => Ok(Self::Keyed(map.into_iter().collect())),
            },
            other => Err(D::Error::custom(format!(
                "expected a usage array or object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl UsagePayload {
    /// Normalizes every record, preserving payload order.
    pub fn into_batch(self) -> UsageBatch {
        let entries: Vec<(Option<String>, Value)> = match self {
            Self::List(items) | Self::Wrapped(items) => {
                items.into_iter().map(|value| (None, value)).collect()
            }
            Self::Keyed(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        };

        let mut batch = UsageBatch::default();
        for (position, (key, value)) in entries.into_iter().enumerate() {
            let fallback_key = key.as_deref();
            let normalized = RawUsageRecord::deserialize(&value)
                .map_err(|err| RecordDefect::Malformed(err.to_string()))
                .and_then(|raw| raw.normalize(fallback_key));
            match normalized {
                Ok(record) => batch.records.push(record),
                Err(defect) => batch.rejected.push(RejectedRecord {
                    position,
                    subject_key: subject_hint(&value, fallback_key),
                    defect,
                }),
            }
        }
        batch
    }
}
