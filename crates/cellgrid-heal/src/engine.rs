//! Healing engine — time-gated, quota-bounded re-broadcast of one entry kind.
//!
//! A pass runs only when `interval_secs` has elapsed since the last one. It
//! resets the cursor, then drains up to `update_number` entries, sending a
//! destroy for each deleted entry and a create for every other one. What
//! "create" and "destroy" mean is up to the [`HealStrategy`].

use std::time::Duration;

use async_trait::async_trait;
use cellgrid_core::config::HealConfig;
use cellgrid_core::messenger::MessengerResult;
use cellgrid_core::{
    epoch_secs, CellMessage, ConsistencyEntry, EntryFilters, EntryKind, HierarchyMessenger,
    SourceError,
};
use tracing::{debug, error, info, warn};

use crate::cursor::HealCursor;
use crate::error::HealResult;

/// Which way a handler relays its messages through the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastDirection {
    /// Toward the root.
    #[default]
    Up,
    /// To every descendant.
    Down,
}

impl BroadcastDirection {
    pub async fn send(
        self,
        messenger: &dyn HierarchyMessenger,
        message: CellMessage,
    ) -> MessengerResult<()> {
        match self {
            BroadcastDirection::Up => messenger.broadcast_up(message).await,
            BroadcastDirection::Down => messenger.broadcast_down(message).await,
        }
    }
}

/// Kind-specific behaviour plugged into a [`HealEngine`].
#[async_trait]
pub trait HealStrategy: Send + Sync {
    type Entry: ConsistencyEntry;

    fn kind(&self) -> EntryKind {
        <Self::Entry as ConsistencyEntry>::KIND
    }

    /// Entries matching `filters`, non-deleted first.
    fn fetch(&self, filters: &EntryFilters) -> Result<Vec<Self::Entry>, SourceError>;

    async fn send_create(&self, _entry: &Self::Entry) -> HealResult<()> {
        error!(
            kind = %self.kind(),
            "healing attempted to send a create message, which this kind does not support"
        );
        Ok(())
    }

    async fn send_destroy(&self, _entry: &Self::Entry) -> HealResult<()> {
        error!(
            kind = %self.kind(),
            "healing attempted to send a delete message, which this kind does not support"
        );
        Ok(())
    }
}

/// Counts from one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealReport {
    pub created: u32,
    pub destroyed: u32,
    /// Entries whose broadcast failed; they are picked up again on a later fetch.
    pub failed: u32,
    /// The drain stopped early because no entries were left to sync.
    pub exhausted: bool,
}

impl HealReport {
    pub fn synced(&self) -> u32 {
        self.created + self.destroyed
    }
}

pub struct HealEngine<S: HealStrategy> {
    strategy: S,
    cursor: HealCursor<S::Entry>,
    interval_secs: u64,
    threshold_secs: u64,
    update_number: u32,
    last_heal_time: u64,
    clock: fn() -> u64,
}

impl<S: HealStrategy> HealEngine<S> {
    pub fn new(strategy: S, config: &HealConfig) -> Self {
        Self {
            strategy,
            cursor: HealCursor::new(),
            interval_secs: config.interval_secs,
            threshold_secs: config.updated_at_threshold_secs,
            update_number: config.update_number,
            last_heal_time: 0,
            clock: epoch_secs,
        }
    }

    /// Replace the wall clock (epoch seconds).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Heal entries in source order.
    pub fn without_shuffle(mut self) -> Self {
        self.cursor = HealCursor::new().without_shuffle();
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn kind(&self) -> EntryKind {
        self.strategy.kind()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn last_heal_time(&self) -> u64 {
        self.last_heal_time
    }

    pub fn set_last_heal_time(&mut self, at: u64) {
        self.last_heal_time = at;
    }

    /// An interval of 0 disables healing.
    pub fn is_time_to_heal(&self, now: u64) -> bool {
        self.interval_secs != 0 && self.last_heal_time + self.interval_secs <= now
    }

    /// Run a pass if one is due. Returns `None` when it was not.
    pub async fn heal(&mut self) -> HealResult<Option<HealReport>> {
        let now = (self.clock)();
        self.heal_at(now).await
    }

    pub async fn heal_at(&mut self, now: u64) -> HealResult<Option<HealReport>> {
        debug!(kind = %self.kind(), "checking if it's time to sync");
        if !self.is_time_to_heal(now) {
            return Ok(None);
        }
        self.set_last_heal_time(now);
        self.reset();
        self.drain().await.map(Some)
    }

    /// Allow the next drain to fetch a fresh batch.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Sync up to `update_number` entries from the cursor.
    pub async fn drain(&mut self) -> HealResult<HealReport> {
        let kind = self.kind();
        info!(%kind, update_number = self.update_number, "syncing {}", kind.model_name_plural());

        let mut report = HealReport::default();
        for _ in 0..self.update_number {
            tokio::task::yield_now().await;
            let filters = self.fetch_filters();
            let strategy = &self.strategy;
            let Some(entry) = self.cursor.next_entry(|| strategy.fetch(&filters))? else {
                info!(%kind, "no more {} to sync", kind.model_name_plural());
                report.exhausted = true;
                break;
            };
            self.sync_entry(&entry, &mut report).await;
        }

        debug!(
            %kind,
            created = report.created,
            destroyed = report.destroyed,
            failed = report.failed,
            "heal drain finished"
        );
        Ok(report)
    }

    async fn sync_entry(&self, entry: &S::Entry, report: &mut HealReport) {
        let kind = self.kind();
        let result = if entry.deleted() {
            debug!(%kind, id = %entry.id(), "sending message to delete {}", kind.model_name_plural());
            self.strategy.send_destroy(entry).await.map(|()| report.destroyed += 1)
        } else {
            debug!(%kind, id = %entry.id(), "sending message to create {}", kind.model_name_plural());
            self.strategy.send_create(entry).await.map(|()| report.created += 1)
        };
        if let Err(e) = result {
            warn!(%kind, id = %entry.id(), error = %e, "failed to sync entry");
            report.failed += 1;
        }
    }

    fn fetch_filters(&self) -> EntryFilters {
        let filters = EntryFilters::default();
        if self.threshold_secs > 0 {
            filters.changes_since((self.clock)().saturating_sub(self.threshold_secs))
        } else {
            filters
        }
    }
}

/// Object-safe view of a [`HealEngine`], for running engines of different
/// kinds side by side.
#[async_trait]
pub trait Healer: Send {
    fn kind(&self) -> EntryKind;

    /// Interval between passes; 0 means healing is disabled.
    fn interval(&self) -> Duration;

    async fn heal(&mut self) -> HealResult<Option<HealReport>>;
}

#[async_trait]
impl<S: HealStrategy + 'static> Healer for HealEngine<S> {
    fn kind(&self) -> EntryKind {
        HealEngine::kind(self)
    }

    fn interval(&self) -> Duration {
        HealEngine::interval(self)
    }

    async fn heal(&mut self) -> HealResult<Option<HealReport>> {
        HealEngine::heal(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use cellgrid_core::entries::{InstanceIdMapping, Timestamps};

    use crate::error::HealError;

    /// Serves a fixed entry list and records what it was asked to send.
    struct Scripted {
        entries: Vec<InstanceIdMapping>,
        fetches: Mutex<Vec<EntryFilters>>,
        created: Mutex<Vec<String>>,
        destroyed: Mutex<Vec<String>>,
        fail_uuid: Option<&'static str>,
    }

    impl Scripted {
        fn new(entries: Vec<InstanceIdMapping>) -> Self {
            Self {
                entries,
                fetches: Mutex::default(),
                created: Mutex::default(),
                destroyed: Mutex::default(),
                fail_uuid: None,
            }
        }

        fn created(&self) -> Vec<String> {
            self.created.lock().unwrap().clone()
        }

        fn fetch_count(&self) -> usize {
            self.fetches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HealStrategy for Scripted {
        type Entry = InstanceIdMapping;

        fn fetch(&self, filters: &EntryFilters) -> Result<Vec<InstanceIdMapping>, SourceError> {
            self.fetches.lock().unwrap().push(filters.clone());
            Ok(self.entries.clone())
        }

        async fn send_create(&self, entry: &InstanceIdMapping) -> HealResult<()> {
            if self.fail_uuid == Some(entry.uuid.as_str()) {
                return Err(HealError::Messenger(
                    cellgrid_core::MessengerError::ChannelClosed,
                ));
            }
            self.created.lock().unwrap().push(entry.uuid.clone());
            Ok(())
        }

        async fn send_destroy(&self, entry: &InstanceIdMapping) -> HealResult<()> {
            self.destroyed.lock().unwrap().push(entry.uuid.clone());
            Ok(())
        }
    }

    /// Uses the default create/destroy.
    struct Unsupported;

    #[async_trait]
    impl HealStrategy for Unsupported {
        type Entry = InstanceIdMapping;

        fn fetch(&self, _filters: &EntryFilters) -> Result<Vec<InstanceIdMapping>, SourceError> {
            Ok(vec![live("a"), gone("b")])
        }
    }

    fn live(uuid: &str) -> InstanceIdMapping {
        InstanceIdMapping {
            id: 1,
            uuid: uuid.to_string(),
            timestamps: Timestamps::created(100),
        }
    }

    fn gone(uuid: &str) -> InstanceIdMapping {
        InstanceIdMapping {
            id: 2,
            uuid: uuid.to_string(),
            timestamps: Timestamps::deleted(100, 200),
        }
    }

    fn live_entries(n: usize) -> Vec<InstanceIdMapping> {
        (0..n).map(|i| live(&format!("e{i}"))).collect()
    }

    fn config(interval_secs: u64, update_number: u32) -> HealConfig {
        HealConfig {
            interval_secs,
            updated_at_threshold_secs: 0,
            update_number,
            tick_secs: 1,
        }
    }

    fn fixed_now() -> u64 {
        5_000
    }

    // ── Time gating ────────────────────────────────────────────────

    #[test]
    fn time_to_heal_honours_interval() {
        let mut engine = HealEngine::new(Scripted::new(Vec::new()), &config(1, 5));
        let last = 1_369_634_796;
        engine.set_last_heal_time(last);

        assert!(!engine.is_time_to_heal(last + 1 - 1));
        assert!(engine.is_time_to_heal(last + 1 + 1));

        engine.set_last_heal_time(last + 5);
        assert!(!engine.is_time_to_heal(last + 1 + 1));
    }

    #[test]
    fn zero_interval_never_heals() {
        let engine = HealEngine::new(Scripted::new(Vec::new()), &config(0, 5));
        assert!(!engine.is_time_to_heal(u64::MAX / 2));
    }

    #[tokio::test]
    async fn heal_within_interval_is_a_noop() {
        let mut engine =
            HealEngine::new(Scripted::new(live_entries(3)), &config(10, 5)).without_shuffle();

        let first = engine.heal_at(1_000).await.unwrap();
        assert_eq!(first.map(|r| r.created), Some(3));
        assert_eq!(engine.last_heal_time(), 1_000);

        assert_eq!(engine.heal_at(1_009).await.unwrap(), None);
        assert_eq!(engine.strategy().fetch_count(), 1);

        let later = engine.heal_at(1_010).await.unwrap().unwrap();
        assert_eq!(later.created, 3);
        assert_eq!(engine.strategy().fetch_count(), 2);
    }

    // ── Draining ───────────────────────────────────────────────────

    #[tokio::test]
    async fn drain_stops_when_source_runs_dry() {
        let mut engine =
            HealEngine::new(Scripted::new(live_entries(3)), &config(1, 5)).without_shuffle();

        let report = engine.drain().await.unwrap();
        assert_eq!(report.created, 3);
        assert!(report.exhausted);

        // No more entries until reset.
        let again = engine.drain().await.unwrap();
        assert_eq!(again.synced(), 0);
        assert_eq!(engine.strategy().created(), vec!["e0", "e1", "e2"]);
        assert_eq!(engine.strategy().fetch_count(), 1);
        assert!(engine.strategy().fetches.lock().unwrap()[0].changes_since.is_none());
    }

    #[tokio::test]
    async fn reset_resumes_then_refetches() {
        let mut engine =
            HealEngine::new(Scripted::new(live_entries(8)), &config(1, 5)).without_shuffle();

        let first = engine.drain().await.unwrap();
        assert_eq!(first.created, 5);
        assert!(!first.exhausted);

        // Without a reset only the rest of the batch goes out.
        let second = engine.drain().await.unwrap();
        assert_eq!(second.created, 3);
        assert!(second.exhausted);

        engine.reset();
        let third = engine.drain().await.unwrap();
        assert_eq!(third.created, 5);
        assert_eq!(engine.strategy().fetch_count(), 2);
    }

    #[tokio::test]
    async fn reset_sends_remainder_before_refetch() {
        let mut engine =
            HealEngine::new(Scripted::new(live_entries(6)), &config(1, 5)).without_shuffle();

        engine.drain().await.unwrap();
        engine.reset();
        engine.drain().await.unwrap();

        assert_eq!(
            engine.strategy().created(),
            vec!["e0", "e1", "e2", "e3", "e4", "e5", "e0", "e1", "e2", "e3"]
        );
    }

    #[tokio::test]
    async fn deleted_entries_are_destroyed() {
        let mut engine = HealEngine::new(
            Scripted::new(vec![live("a"), gone("b"), gone("c")]),
            &config(1, 10),
        )
        .without_shuffle();

        let report = engine.drain().await.unwrap();
        assert_eq!((report.created, report.destroyed), (1, 2));
        assert_eq!(*engine.strategy().destroyed.lock().unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn broadcast_failure_does_not_stop_the_pass() {
        let mut strategy = Scripted::new(live_entries(3));
        strategy.fail_uuid = Some("e1");
        let mut engine = HealEngine::new(strategy, &config(1, 5)).without_shuffle();

        let report = engine.drain().await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(engine.strategy().created(), vec!["e0", "e2"]);
    }

    #[tokio::test]
    async fn threshold_limits_fetch_to_recent_changes() {
        let mut cfg = config(1, 5);
        cfg.updated_at_threshold_secs = 600;
        let mut engine = HealEngine::new(Scripted::new(live_entries(1)), &cfg).with_clock(fixed_now);

        engine.heal().await.unwrap();
        let fetches = engine.strategy().fetches.lock().unwrap().clone();
        assert_eq!(fetches[0].changes_since, Some(5_000 - 600));
    }

    #[tokio::test]
    async fn default_directions_log_and_succeed() {
        let mut engine = HealEngine::new(Unsupported, &config(1, 5));
        let report = engine.drain().await.unwrap();
        assert_eq!((report.created, report.destroyed, report.failed), (1, 1, 0));
    }
}
