//! Heal monitor — background task per entry kind that drives its engine.
//!
//! Each task wakes every `tick`, asks its engine to heal (the engine itself
//! decides whether a pass is due), and logs the outcome. Because one task
//! owns one engine, passes of the same kind never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cellgrid_core::EntryKind;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::Healer;

/// Per-kind monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs one heal loop per entry kind.
pub struct HealMonitor {
    tick: Duration,
    monitors: Arc<RwLock<HashMap<EntryKind, MonitorSlot>>>,
}

impl HealMonitor {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start driving `healer`. A loop already running for the same kind is
    /// stopped and replaced.
    pub async fn start_monitor(&self, healer: Box<dyn Healer>) {
        let kind = healer.kind();
        let interval = healer.interval();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tick = self.tick;
        let handle = tokio::spawn(run_heal_loop(healer, tick, shutdown_rx));

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(kind, MonitorSlot { handle, shutdown_tx }) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        if interval.is_zero() {
            info!(%kind, "heal monitor started with healing disabled");
        } else {
            info!(%kind, interval_secs = interval.as_secs(), "heal monitor started");
        }
    }

    pub async fn stop_monitor(&self, kind: EntryKind) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(&kind) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%kind, "heal monitor stopped");
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (kind, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%kind, "heal monitor stopped");
        }
        info!("all heal monitors stopped");
    }

    pub async fn active_monitors(&self) -> Vec<EntryKind> {
        let monitors = self.monitors.read().await;
        let mut kinds: Vec<EntryKind> = monitors.keys().copied().collect();
        kinds.sort_by_key(|k| k.model_name());
        kinds
    }

    pub async fn is_monitoring(&self, kind: EntryKind) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(&kind)
    }
}

async fn run_heal_loop(
    mut healer: Box<dyn Healer>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = healer.kind();
    debug!(%kind, tick_ms = tick.as_millis() as u64, "heal loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {
                match healer.heal().await {
                    Ok(Some(report)) => debug!(
                        %kind,
                        created = report.created,
                        destroyed = report.destroyed,
                        failed = report.failed,
                        exhausted = report.exhausted,
                        "heal pass complete"
                    ),
                    Ok(None) => {}
                    Err(e) => error!(%kind, error = %e, "heal pass failed"),
                }
            }
            _ = shutdown.changed() => {
                debug!(%kind, "heal loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use cellgrid_core::SourceError;

    use crate::engine::HealReport;
    use crate::error::{HealError, HealResult};

    /// Counts invocations; optionally fails every pass.
    struct CountingHealer {
        kind: EntryKind,
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    impl CountingHealer {
        fn boxed(kind: EntryKind, calls: &Arc<AtomicU32>) -> Box<dyn Healer> {
            Box::new(Self {
                kind,
                calls: calls.clone(),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl Healer for CountingHealer {
        fn kind(&self) -> EntryKind {
            self.kind
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn heal(&mut self) -> HealResult<Option<HealReport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HealError::Source(SourceError::Unavailable("down".into())));
            }
            Ok(Some(HealReport::default()))
        }
    }

    #[tokio::test]
    async fn monitor_starts_and_stops() {
        let monitor = HealMonitor::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        assert!(monitor.active_monitors().await.is_empty());

        monitor
            .start_monitor(CountingHealer::boxed(EntryKind::SecurityGroup, &calls))
            .await;
        assert!(monitor.is_monitoring(EntryKind::SecurityGroup).await);

        monitor.stop_monitor(EntryKind::SecurityGroup).await;
        assert!(!monitor.is_monitoring(EntryKind::SecurityGroup).await);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_heals_every_tick() {
        let monitor = HealMonitor::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        monitor
            .start_monitor(CountingHealer::boxed(EntryKind::S3Image, &calls))
            .await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        monitor.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_keeps_loop_alive() {
        let monitor = HealMonitor::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        monitor
            .start_monitor(Box::new(CountingHealer {
                kind: EntryKind::VolumeIdMapping,
                calls: calls.clone(),
                fail: true,
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        monitor.stop_all().await;
    }

    #[tokio::test]
    async fn monitor_replaces_existing_kind() {
        let monitor = HealMonitor::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        monitor
            .start_monitor(CountingHealer::boxed(EntryKind::SecurityGroupRule, &calls))
            .await;
        monitor
            .start_monitor(CountingHealer::boxed(EntryKind::SecurityGroupRule, &calls))
            .await;
        monitor
            .start_monitor(CountingHealer::boxed(EntryKind::InstanceIdMapping, &calls))
            .await;

        assert_eq!(monitor.active_monitors().await.len(), 2);
        monitor.stop_all().await;
        assert!(monitor.active_monitors().await.is_empty());
    }
}
