//! The polling alert monitor.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::item::{Alert, AlertableItem, ItemError, RawAlertableItem};
use super::state::{AlertEntry, AlertPhase, phase_at, step};
use super::{AlertError, ItemFeed, MonitorConfig, TickReport};
use crate::clock::{Clock, SystemClock};
use crate::types::ItemId;

type Callback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Handle returned by [`AlertMonitor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Polls an [`ItemFeed`] and fires each item at most once per due date.
///
/// Cheap to clone; clones share state. Ticks are evaluated under a single
/// state lock, so a manual [`trigger_check`](Self::trigger_check) racing the
/// background loop cannot fire an item twice.
pub struct AlertMonitor<F, C = SystemClock> {
    inner: Arc<Inner<F, C>>,
}

struct Inner<F, C> {
    feed: F,
    clock: C,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_subscription: AtomicU64,
    /// Bumped by `stop`; in-flight network results from an older generation are dropped.
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct MonitorState {
    entries: HashMap<ItemId, AlertEntry>,
    items: HashMap<ItemId, AlertableItem>,
    phases: HashMap<ItemId, AlertPhase>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<F, C> Clone for AlertMonitor<F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, C> fmt::Debug for AlertMonitor<F, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertMonitor")
            .field("config", &self.inner.config)
            .field("running", &lock(&self.inner.running).is_some())
            .field("tracked_items", &lock(&self.inner.state).items.len())
            .finish_non_exhaustive()
    }
}

impl<F: ItemFeed> AlertMonitor<F, SystemClock> {
    pub fn new(feed: F, config: MonitorConfig) -> Self {
        Self::with_clock(feed, SystemClock, config)
    }
}

impl<F: ItemFeed, C: Clock> AlertMonitor<F, C> {
    pub fn with_clock(feed: F, clock: C, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                clock,
                config,
                state: Mutex::new(MonitorState::default()),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Registers a callback for every alert fired from now on.
    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&Alert) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Spawns the polling loop on the current tokio runtime. Calling it again
    /// while the loop is alive does nothing.
    pub fn start(&self) {
        let mut running = lock(&self.inner.running);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("alert monitor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        *running = Some(Running { cancel, handle });
        info!(
            lead_minutes = self.inner.config.lead_time.num_minutes(),
            poll_interval_secs = self.inner.config.poll_interval.as_secs(),
            "alert monitor started"
        );
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Cancels the loop and drops every subscription. Alert state is kept, so
    /// a later `start` does not re-fire items that already alerted.
    pub async fn stop(&self) {
        let running = lock(&self.inner.running).take();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers).clear();

        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "alert monitor loop ended abnormally");
            }
            info!("alert monitor stopped");
        }
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.trigger_check() => {
                    if let Err(err) = result {
                        warn!(error = %err, "alert tick failed; retrying next interval");
                    }
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.inner.config.poll_interval) => {}
            }
        }
        debug!("alert monitor loop exited");
    }

    /// Runs one tick now: fetch, evaluate every item, notify subscribers.
    ///
    /// A failed fetch leaves all state untouched.
    pub async fn trigger_check(&self) -> Result<TickReport, AlertError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let timeout = self.inner.config.fetch_timeout;

        let raw_items = match tokio::time::timeout(timeout, self.inner.feed.fetch_items()).await {
            Ok(Ok(raw_items)) => raw_items,
            Ok(Err(err)) => {
                warn!(error = %err, "alert feed fetch failed");
                return Err(AlertError::FetchFailed {
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                warn!(?timeout, "alert feed fetch timed out");
                return Err(AlertError::FetchFailed {
                    reason: timed_out(timeout),
                });
            }
        };

        let report = {
            let mut state = lock(&self.inner.state);
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                debug!("monitor stopped during fetch; discarding feed response");
                return Ok(TickReport {
                    discarded: true,
                    ..TickReport::default()
                });
            }
            let now = self.inner.clock.now();
            state.apply(raw_items, now, self.inner.config.lead_time)
        };

        debug!(
            evaluated = report.evaluated,
            fired = report.fired.len(),
            errors = report.errors.len(),
            "alert tick complete"
        );
        self.notify(&report.fired);
        Ok(report)
    }

    fn notify(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        let handlers: Vec<Callback> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for alert in alerts {
            info!(
                item_id = %alert.item_id,
                severity = %alert.severity,
                minutes_until_due = alert.minutes_until_due,
                "alert fired"
            );
            for handler in &handlers {
                handler(alert);
            }
        }
    }

    /// Silences an item until its due date changes or the suppression is cleared.
    pub fn dismiss(&self, item_id: &ItemId) -> Result<(), AlertError> {
        let mut state = lock(&self.inner.state);
        let due_at = state.due_at(item_id)?;
        state
            .entries
            .insert(item_id.clone(), AlertEntry::dismissed(due_at));
        state.phases.insert(item_id.clone(), AlertPhase::Suppressed);
        info!(%item_id, "alert dismissed");
        Ok(())
    }

    /// Forgets any alert or dismissal recorded for the item so it can fire
    /// again on the next tick. Returns false if nothing was recorded.
    pub fn clear_suppression(&self, item_id: &ItemId) -> bool {
        let mut state = lock(&self.inner.state);
        let cleared = state.entries.remove(item_id).is_some();
        if cleared {
            state.reassess(item_id, self.inner.clock.now(), self.inner.config.lead_time);
        }
        cleared
    }

    /// Drops all state for a finished item. Returns false if it was unknown.
    pub fn complete(&self, item_id: &ItemId) -> bool {
        let mut state = lock(&self.inner.state);
        let had_entry = state.entries.remove(item_id).is_some();
        let had_item = state.items.remove(item_id).is_some();
        state.phases.remove(item_id);
        if had_entry || had_item {
            info!(%item_id, "item completed");
        }
        had_entry || had_item
    }

    /// Pushes the item's due date back by `minutes` through the feed.
    ///
    /// On success the item's alert state is cleared so it re-arms against the
    /// new due date. On failure nothing changes locally.
    pub async fn snooze(
        &self,
        item_id: &ItemId,
        minutes: i64,
    ) -> Result<DateTime<Utc>, AlertError> {
        let snooze_failed = |reason: String| AlertError::SnoozeFailed {
            item_id: item_id.clone(),
            reason,
        };

        if minutes <= 0 {
            return Err(snooze_failed(format!(
                "snooze length must be positive, got {minutes}"
            )));
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let due_at = lock(&self.inner.state).due_at(item_id)?;
        let snoozed = Duration::try_minutes(minutes)
            .and_then(|delta| due_at.checked_add_signed(delta))
            .ok_or_else(|| snooze_failed(format!("{minutes} minutes is out of range")))?;

        let timeout = self.inner.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.inner.feed.update_due_date(item_id, snoozed)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(%item_id, error = %err, "snooze rejected by feed");
                return Err(snooze_failed(err.to_string()));
            }
            Err(_) => {
                warn!(%item_id, ?timeout, "snooze timed out");
                return Err(snooze_failed(timed_out(timeout)));
            }
        }

        let mut state = lock(&self.inner.state);
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(%item_id, "monitor stopped during snooze; next tick picks up the new due date");
            return Ok(snoozed);
        }
        state.entries.remove(item_id);
        if let Some(item) = state.items.get_mut(item_id) {
            item.due_at = Some(snoozed);
        }
        state.reassess(item_id, self.inner.clock.now(), self.inner.config.lead_time);
        info!(%item_id, minutes, due_at = %snoozed, "alert snoozed");
        Ok(snoozed)
    }

    /// The item's phase as of the last evaluation, or `None` if it is not tracked.
    pub fn phase(&self, item_id: &ItemId) -> Option<AlertPhase> {
        lock(&self.inner.state).phases.get(item_id).copied()
    }

    pub fn last_alerted_at(&self, item_id: &ItemId) -> Option<DateTime<Utc>> {
        lock(&self.inner.state)
            .entries
            .get(item_id)
            .and_then(|entry| entry.last_alerted_at)
    }
}

fn timed_out(timeout: StdDuration) -> String {
    format!("timed out after {}ms", timeout.as_millis())
}

impl MonitorState {
    fn due_at(&self, item_id: &ItemId) -> Result<DateTime<Utc>, AlertError> {
        let item = self
            .items
            .get(item_id)
            .ok_or_else(|| AlertError::UnknownItem {
                item_id: item_id.clone(),
            })?;
        item.due_at.ok_or_else(|| AlertError::NoDueDate {
            item_id: item_id.clone(),
        })
    }

    /// Recomputes a tracked item's phase after its entry or due date changed.
    fn reassess(&mut self, item_id: &ItemId, now: DateTime<Utc>, lead_time: Duration) {
        let Some(item) = self.items.get(item_id) else {
            return;
        };
        let phase = phase_at(self.entries.get(item_id), item.due_at, now, lead_time);
        self.phases.insert(item_id.clone(), phase);
    }

    /// Evaluates a fetched feed against the recorded state.
    fn apply(
        &mut self,
        raw_items: Vec<RawAlertableItem>,
        now: DateTime<Utc>,
        lead_time: Duration,
    ) -> TickReport {
        let mut report = TickReport::default();
        let mut seen: HashSet<ItemId> = HashSet::with_capacity(raw_items.len());
        let mut items = HashMap::with_capacity(raw_items.len());
        let mut phases = HashMap::with_capacity(raw_items.len());

        for raw in raw_items {
            if raw.completed {
                continue;
            }

            let item = match raw.parse() {
                Ok(item) => item,
                Err(err) => {
                    warn!(error = %err, "skipping feed item");
                    // Still present upstream: keep what we knew about it.
                    if let Some(id) = err.item_id() {
                        if seen.insert(id.clone()) {
                            if let Some(known) = self.items.get(id) {
                                items.insert(id.clone(), known.clone());
                            }
                            if let Some(phase) = self.phases.get(id) {
                                phases.insert(id.clone(), *phase);
                            }
                        }
                    }
                    report.errors.push(err);
                    continue;
                }
            };

            if !seen.insert(item.id.clone()) {
                let err = ItemError::DuplicateItem {
                    item_id: item.id.clone(),
                };
                warn!(error = %err, "skipping feed item");
                report.errors.push(err);
                continue;
            }

            let mut entry = self.entries.remove(&item.id);
            let phase = step(&mut entry, item.due_at, now, lead_time);
            debug!(item_id = %item.id, %phase, "evaluated item");

            if phase == AlertPhase::Fired {
                if let Some(due_at) = item.due_at {
                    report.fired.push(Alert::new(&item, due_at, now));
                }
            }
            if let Some(entry) = entry {
                self.entries.insert(item.id.clone(), entry);
            }
            phases.insert(item.id.clone(), phase);
            items.insert(item.id.clone(), item);
            report.evaluated += 1;
        }

        let before = self.entries.len();
        self.entries.retain(|id, _| seen.contains(id));
        let collected = before - self.entries.len();
        if collected > 0 {
            debug!(collected, "dropped alert state for items no longer in the feed");
        }

        self.items = items;
        self.phases = phases;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use chrono::TimeZone;
    use tokio::sync::Notify;

    use crate::alert::Severity;
    use crate::clock::ManualClock;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(&'static str);

    #[derive(Default)]
    struct FakeState {
        items: Mutex<Vec<RawAlertableItem>>,
        fail_fetch: AtomicBool,
        fail_update: AtomicBool,
        updates: Mutex<Vec<(ItemId, DateTime<Utc>)>>,
        /// (entered, release): fetch signals `entered` then waits for `release`.
        gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    }

    /// In-memory feed. Clones share state so tests can keep a handle.
    #[derive(Clone, Default)]
    struct FakeFeed {
        state: Arc<FakeState>,
    }

    impl FakeFeed {
        fn with_items(items: Vec<RawAlertableItem>) -> Self {
            let feed = Self::default();
            *feed.state.items.lock().unwrap() = items;
            feed
        }

        fn set_items(&self, items: Vec<RawAlertableItem>) {
            *self.state.items.lock().unwrap() = items;
        }

        fn updates(&self) -> Vec<(ItemId, DateTime<Utc>)> {
            self.state.updates.lock().unwrap().clone()
        }

        fn gate(&self) -> (Arc<Notify>, Arc<Notify>) {
            let gate = (Arc::new(Notify::new()), Arc::new(Notify::new()));
            *self.state.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn ungate(&self) {
            *self.state.gate.lock().unwrap() = None;
        }
    }

    impl ItemFeed for FakeFeed {
        type Error = FakeError;

        fn fetch_items(
            &self,
        ) -> impl Future<Output = Result<Vec<RawAlertableItem>, Self::Error>> + Send {
            let state = Arc::clone(&self.state);
            async move {
                let gate = state.gate.lock().unwrap().clone();
                if let Some((entered, release)) = gate {
                    entered.notify_one();
                    release.notified().await;
                }
                if state.fail_fetch.load(Ordering::SeqCst) {
                    return Err(FakeError("backend unavailable"));
                }
                Ok(state.items.lock().unwrap().clone())
            }
        }

        fn update_due_date(
            &self,
            item_id: &ItemId,
            due_at: DateTime<Utc>,
        ) -> impl Future<Output = Result<(), Self::Error>> + Send {
            let state = Arc::clone(&self.state);
            let item_id = item_id.clone();
            async move {
                if state.fail_update.load(Ordering::SeqCst) {
                    return Err(FakeError("update rejected"));
                }
                state.updates.lock().unwrap().push((item_id.clone(), due_at));
                for raw in state.items.lock().unwrap().iter_mut() {
                    if raw.id.as_deref() == Some(item_id.as_str()) {
                        raw.due_date = Some(due_at.to_rfc3339());
                    }
                }
                Ok(())
            }
        }
    }

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn id(value: &str) -> ItemId {
        ItemId::new(value).unwrap()
    }

    fn todo(item_id: &str, due_in_minutes: i64) -> RawAlertableItem {
        RawAlertableItem::new(item_id, &format!("Task {item_id}"), Some(ts(due_in_minutes)))
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            lead_time: Duration::minutes(10),
            poll_interval: StdDuration::from_secs(60),
            fetch_timeout: StdDuration::from_secs(5),
        }
    }

    type TestMonitor = AlertMonitor<FakeFeed, ManualClock>;

    fn harness(items: Vec<RawAlertableItem>) -> (TestMonitor, FakeFeed, ManualClock) {
        let feed = FakeFeed::with_items(items);
        let clock = ManualClock::new(ts(0));
        let monitor = AlertMonitor::with_clock(feed.clone(), clock.clone(), config());
        (monitor, feed, clock)
    }

    fn count_alerts(monitor: &TestMonitor) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        monitor.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn fires_once_across_five_ticks() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 1)]);
        let count = count_alerts(&monitor);

        let mut fired = 0;
        for _ in 0..5 {
            fired += monitor.trigger_check().await.unwrap().fired.len();
        }

        assert_eq!(fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Suppressed));
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));
    }

    #[tokio::test]
    async fn fired_alert_carries_minutes_and_severity() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 8)]);
        let report = monitor.trigger_check().await.unwrap();

        let alert = &report.fired[0];
        assert_eq!(alert.item_id, id("a"));
        assert_eq!(alert.title, "Task a");
        assert_eq!(alert.minutes_until_due, 8);
        assert_eq!(alert.severity, Severity::Urgent);
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Fired));
    }

    #[tokio::test]
    async fn items_outside_the_window_do_not_fire() {
        let (monitor, _feed, _clock) = harness(vec![
            todo("far", 11),
            todo("past", -1),
            RawAlertableItem::new("none", "No due date", None),
        ]);
        let report = monitor.trigger_check().await.unwrap();

        assert!(report.fired.is_empty());
        assert_eq!(report.evaluated, 3);
        for item in ["far", "past", "none"] {
            assert_eq!(monitor.phase(&id(item)), Some(AlertPhase::Dormant));
        }
    }

    #[tokio::test]
    async fn snooze_rearms_against_the_new_due_date() {
        let (monitor, feed, clock) = harness(vec![todo("a", 1)]);
        assert_eq!(monitor.trigger_check().await.unwrap().fired.len(), 1);

        let snoozed = monitor.snooze(&id("a"), 30).await.unwrap();
        assert_eq!(snoozed, ts(31));
        assert_eq!(feed.updates(), vec![(id("a"), ts(31))]);
        assert_eq!(monitor.last_alerted_at(&id("a")), None);
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Dormant));

        // 31 minutes out is beyond the 10 minute lead.
        assert!(monitor.trigger_check().await.unwrap().fired.is_empty());

        clock.advance(Duration::minutes(22));
        let report = monitor.trigger_check().await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].due_at, ts(31));
    }

    #[tokio::test]
    async fn failed_snooze_leaves_state_unchanged() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        monitor.trigger_check().await.unwrap();
        feed.state.fail_update.store(true, Ordering::SeqCst);

        let err = monitor.snooze(&id("a"), 30).await.unwrap_err();
        assert_eq!(
            err,
            AlertError::SnoozeFailed {
                item_id: id("a"),
                reason: "update rejected".to_string(),
            }
        );
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));
        assert!(feed.updates().is_empty());
        assert!(monitor.trigger_check().await.unwrap().fired.is_empty());
    }

    #[tokio::test]
    async fn snooze_rejects_bad_requests() {
        let (monitor, _feed, _clock) = harness(vec![RawAlertableItem::new("none", "x", None)]);
        monitor.trigger_check().await.unwrap();

        assert_eq!(
            monitor.snooze(&id("missing"), 5).await,
            Err(AlertError::UnknownItem {
                item_id: id("missing")
            })
        );
        assert_eq!(
            monitor.snooze(&id("none"), 5).await,
            Err(AlertError::NoDueDate { item_id: id("none") })
        );
        assert!(matches!(
            monitor.snooze(&id("none"), 0).await,
            Err(AlertError::SnoozeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn dismiss_suppresses_until_cleared() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 5)]);
        monitor.trigger_check().await.unwrap();

        monitor.dismiss(&id("a")).unwrap();
        assert_eq!(monitor.last_alerted_at(&id("a")), None);
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Suppressed));
        for _ in 0..3 {
            assert!(monitor.trigger_check().await.unwrap().fired.is_empty());
        }

        assert!(monitor.clear_suppression(&id("a")));
        assert!(!monitor.clear_suppression(&id("a")));
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Armed));
        assert_eq!(monitor.trigger_check().await.unwrap().fired.len(), 1);
    }

    #[tokio::test]
    async fn snooze_inside_the_lead_window_reports_armed() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 1)]);
        monitor.trigger_check().await.unwrap();

        assert_eq!(monitor.snooze(&id("a"), 3).await.unwrap(), ts(4));
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Armed));

        let report = monitor.trigger_check().await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].due_at, ts(4));
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Fired));
    }

    #[tokio::test]
    async fn dismissed_item_fires_again_when_due_date_moves() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 5)]);
        monitor.dismiss(&id("a")).unwrap_err();
        monitor.trigger_check().await.unwrap();
        monitor.dismiss(&id("a")).unwrap();

        feed.set_items(vec![todo("a", 7)]);
        let report = monitor.trigger_check().await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].due_at, ts(7));
    }

    #[tokio::test]
    async fn fetch_failure_preserves_state() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        monitor.trigger_check().await.unwrap();

        feed.state.fail_fetch.store(true, Ordering::SeqCst);
        let err = monitor.trigger_check().await.unwrap_err();
        assert_eq!(
            err,
            AlertError::FetchFailed {
                reason: "backend unavailable".to_string()
            }
        );
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));

        feed.state.fail_fetch.store(false, Ordering::SeqCst);
        assert!(monitor.trigger_check().await.unwrap().fired.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        let _gate = feed.gate();

        let err = monitor.trigger_check().await.unwrap_err();
        assert_eq!(
            err,
            AlertError::FetchFailed {
                reason: "timed out after 5000ms".to_string()
            }
        );
        assert_eq!(monitor.phase(&id("a")), None);
    }

    #[tokio::test]
    async fn late_response_after_stop_is_ignored() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        let count = count_alerts(&monitor);
        let (entered, release) = feed.gate();

        let in_flight = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.trigger_check().await }
        });
        entered.notified().await;
        monitor.stop().await;
        release.notify_one();

        let report = in_flight.await.unwrap().unwrap();
        assert!(report.discarded);
        assert!(report.fired.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.phase(&id("a")), None);
        assert_eq!(monitor.last_alerted_at(&id("a")), None);

        feed.ungate();
        assert_eq!(monitor.trigger_check().await.unwrap().fired.len(), 1);
    }

    #[tokio::test]
    async fn vanished_items_are_forgotten() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1), todo("b", 2)]);
        monitor.trigger_check().await.unwrap();

        feed.set_items(vec![todo("b", 2)]);
        monitor.trigger_check().await.unwrap();
        assert_eq!(monitor.phase(&id("a")), None);
        assert_eq!(monitor.last_alerted_at(&id("a")), None);
        assert_eq!(monitor.last_alerted_at(&id("b")), Some(ts(0)));

        feed.set_items(vec![todo("a", 1), todo("b", 2)]);
        let report = monitor.trigger_check().await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].item_id, id("a"));
    }

    #[tokio::test]
    async fn bad_items_do_not_abort_the_tick() {
        let mut no_id = todo("x", 1);
        no_id.id = None;
        let mut bad_date = todo("bad", 1);
        bad_date.due_date = Some("soon".to_string());

        let (monitor, _feed, _clock) =
            harness(vec![no_id, bad_date, todo("good", 2), todo("good", 3)]);
        let report = monitor.trigger_check().await.unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].due_at, ts(2));
        assert_eq!(
            report.errors,
            vec![
                ItemError::MissingId,
                ItemError::InvalidDueDate {
                    item_id: id("bad"),
                    value: "soon".to_string(),
                },
                ItemError::DuplicateItem { item_id: id("good") },
            ]
        );
    }

    #[tokio::test]
    async fn unparseable_due_date_keeps_existing_state() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        monitor.trigger_check().await.unwrap();

        let mut broken = todo("a", 1);
        broken.due_date = Some("garbage".to_string());
        feed.set_items(vec![broken]);
        monitor.trigger_check().await.unwrap();
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));

        feed.set_items(vec![todo("a", 1)]);
        assert!(monitor.trigger_check().await.unwrap().fired.is_empty());
    }

    #[tokio::test]
    async fn completed_items_are_skipped_and_cleared() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        monitor.trigger_check().await.unwrap();

        assert!(monitor.complete(&id("a")));
        assert!(!monitor.complete(&id("a")));
        assert_eq!(monitor.phase(&id("a")), None);

        let mut done = todo("a", 1);
        done.completed = true;
        feed.set_items(vec![done]);
        let report = monitor.trigger_check().await.unwrap();
        assert_eq!(report.evaluated, 0);
        assert!(report.fired.is_empty());
    }

    #[tokio::test]
    async fn each_subscriber_gets_each_alert_once() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1), todo("b", 2)]);
        let first = count_alerts(&monitor);
        let second = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&second);
        let second_id = monitor.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        monitor.trigger_check().await.unwrap();
        monitor.trigger_check().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);

        assert!(monitor.unsubscribe(second_id));
        assert!(!monitor.unsubscribe(second_id));

        feed.set_items(vec![todo("a", 3), todo("b", 4)]);
        monitor.trigger_check().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 4);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_checks_fire_once() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 1)]);
        let (left, right) = tokio::join!(monitor.trigger_check(), monitor.trigger_check());
        assert_eq!(left.unwrap().fired.len() + right.unwrap().fired.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_fires_once_and_stops() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 1)]);
        let count = count_alerts(&monitor);

        monitor.start();
        monitor.start();
        tokio::time::sleep(StdDuration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(monitor.is_running());

        tokio::time::sleep(StdDuration::from_secs(5 * 60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_does_not_refire() {
        let (monitor, _feed, _clock) = harness(vec![todo("a", 1)]);
        let before = count_alerts(&monitor);
        monitor.start();
        tokio::time::sleep(StdDuration::from_secs(1)).await;
        assert_eq!(before.load(Ordering::SeqCst), 1);
        monitor.stop().await;

        let after = count_alerts(&monitor);
        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(StdDuration::from_secs(3 * 60)).await;
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.phase(&id("a")), Some(AlertPhase::Suppressed));
        assert_eq!(monitor.last_alerted_at(&id("a")), Some(ts(0)));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_retries_after_fetch_failure() {
        let (monitor, feed, _clock) = harness(vec![todo("a", 1)]);
        let count = count_alerts(&monitor);
        feed.state.fail_fetch.store(true, Ordering::SeqCst);

        monitor.start();
        tokio::time::sleep(StdDuration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        feed.state.fail_fetch.store(false, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_secs(61)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        monitor.stop().await;
    }
}
