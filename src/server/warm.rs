//! Periodic keep-warm heartbeat

use crate::events::{Events, ProvisioningEvent};
use crate::provisioning::{RegistryStats, ResourceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// A tick this far behind schedule counts as late
const LATE_TOLERANCE: Duration = Duration::from_secs(1);

pub struct Warmer {
    registry: Arc<ResourceRegistry>,
    events: Events,
    interval: Duration,
}

impl Warmer {
    pub fn new(registry: Arc<ResourceRegistry>, events: Events, interval: Duration) -> Self {
        Self {
            registry,
            events,
            interval,
        }
    }

    /// Report one heartbeat
    pub fn tick(&self, late: bool) -> RegistryStats {
        let stats = self.registry.stats();
        self.events.emit(ProvisioningEvent::WarmTick { late, stats });
        stats
    }

    /// Tick every interval, forever
    pub async fn run(self) {
        if self.interval.is_zero() {
            debug!("Keep-warm ticker disabled");
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let scheduled = ticker.tick().await;
            self.tick(scheduled.elapsed() > LATE_TOLERANCE);
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let sink = Arc::new(RecordingSink::new());
        let warmer = Warmer::new(
            Arc::new(ResourceRegistry::new()),
            Events::with_sink(sink.clone()),
            Duration::from_secs(240),
        );
        let handle = warmer.spawn();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(sink.count("warm_tick"), 0);

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(sink.count("warm_tick"), 2);
        assert!(sink
            .events()
            .iter()
            .all(|e| matches!(e, ProvisioningEvent::WarmTick { late: false, .. })));

        handle.abort();
    }

    #[tokio::test]
    async fn test_zero_interval_disables() {
        let sink = Arc::new(RecordingSink::new());
        Warmer::new(
            Arc::new(ResourceRegistry::new()),
            Events::with_sink(sink.clone()),
            Duration::ZERO,
        )
        .run()
        .await;
        assert_eq!(sink.count("warm_tick"), 0);
    }

    #[test]
    fn test_tick_reports_stats() {
        let sink = Arc::new(RecordingSink::new());
        let warmer = Warmer::new(
            Arc::new(ResourceRegistry::new()),
            Events::with_sink(sink.clone()),
            Duration::from_secs(240),
        );

        let stats = warmer.tick(true);

        assert_eq!(stats, RegistryStats::default());
        assert_eq!(
            sink.events(),
            vec![ProvisioningEvent::WarmTick { late: true, stats }]
        );
    }
}
