//! Due-date alerting over a polled item feed.
//!
//! The [`AlertMonitor`] polls an [`ItemFeed`] on a fixed interval and emits at
//! most one [`Alert`] per item per due date. Snoozing writes the new due date
//! back through the feed; dismissing suppresses the item locally.

mod item;
mod monitor;
mod state;

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::types::ItemId;

pub use item::{Alert, AlertableItem, ItemError, RawAlertableItem, Severity, parse_due_date};
pub use monitor::{AlertMonitor, SubscriptionId};
pub use state::{AlertEntry, AlertPhase, in_lead_window, phase_at, step};

/// Errors returned by [`AlertMonitor`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// The feed rejected or never answered the due-date update. Alert state is unchanged.
    #[error("failed to snooze {item_id}: {reason}")]
    SnoozeFailed { item_id: ItemId, reason: String },

    /// The feed could not be read. The tick was a no-op.
    #[error("failed to fetch alertable items: {reason}")]
    FetchFailed { reason: String },

    #[error("unknown item {item_id}")]
    UnknownItem { item_id: ItemId },

    #[error("item {item_id} has no due date")]
    NoDueDate { item_id: ItemId },
}

/// The upstream source of alertable items.
pub trait ItemFeed: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches every item that should currently be watched.
    fn fetch_items(
        &self,
    ) -> impl Future<Output = Result<Vec<RawAlertableItem>, Self::Error>> + Send;

    /// Persists a new due date for an item.
    fn update_due_date(
        &self,
        item_id: &ItemId,
        due_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Timing knobs for [`AlertMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How far ahead of a due date an item becomes alert-eligible.
    pub lead_time: Duration,
    /// Pause between the end of one tick and the start of the next.
    pub poll_interval: StdDuration,
    /// Upper bound on each feed call.
    pub fetch_timeout: StdDuration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            lead_time: Duration::minutes(15),
            poll_interval: StdDuration::from_secs(60),
            fetch_timeout: StdDuration::from_secs(10),
        }
    }
}

/// Outcome of one fetch-and-evaluate pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Alerts emitted by this tick, in feed order.
    pub fired: Vec<Alert>,
    /// Items skipped because of per-item problems.
    pub errors: Vec<ItemError>,
    /// Number of items evaluated.
    pub evaluated: usize,
    /// The monitor was stopped while the fetch was in flight; nothing was applied.
    pub discarded: bool,
}
