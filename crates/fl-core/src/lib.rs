//! Core domain logic for FocusLens.
//!
//! This crate contains the fundamental types and logic for:
//! - Time frames: filtering usage records to today, this week or this month
//! - Aggregation: per-domain/per-app totals, visit counts and average sessions
//! - Summaries and focus scores over an aggregated window
//! - Alerting: a polling monitor that fires once per item due date
//!
//! Everything except [`alert::AlertMonitor`] is synchronous and side-effect free.

mod aggregate;
pub mod alert;
pub mod clock;
mod focus;
pub mod record;
mod summary;
mod time_frame;
pub mod types;

pub use aggregate::{Aggregates, GroupedAggregate, OTHERS_LABEL, RankedShare, aggregate};
pub use alert::{
    Alert, AlertError, AlertMonitor, AlertPhase, AlertableItem, ItemError, ItemFeed,
    MonitorConfig, RawAlertableItem, Severity, SubscriptionId, TickReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use focus::{
    DEFAULT_PRODUCTIVE_KEYWORDS, FocusRating, FocusSplit, KeywordMatcher, ProductiveKeys,
    classify,
};
pub use record::{
    RawUsageRecord, RecordDefect, RejectedRecord, UsageBatch, UsagePayload, UsageRecord,
};
pub use summary::{NONE_KEY, Summary, summarize};
pub use time_frame::{TimeFrame, filter_by_time_frame};
pub use types::{AnalyticsError, ItemId, ProductivityCategory, SubjectKey, ValidationError};
