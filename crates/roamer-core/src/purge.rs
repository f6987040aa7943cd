// ── Removed-host purge sweep ──
//
// Hosts reported as removed linger for a grace period so a quick
// reappearance (a reassociation, a flapping observer) keeps their state.
// The sweep drops the ones whose grace period ran out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::model::MacAddress;

impl Engine {
    /// Purge every mobile host whose removal is older than the configured
    /// timeout as of `now`. Returns the purged MACs in order.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<MacAddress> {
        let timeout = self.settings().removed_host_timeout;
        let access_points = self.access_point_snapshot();

        let mut purged: Vec<MacAddress> = self.with_ctx(|ctx| {
            self.hosts()
                .into_iter()
                .filter(|host| host.purge_if_expired(now, timeout, &access_points, ctx))
                .map(|host| host.mac())
                .collect()
        });
        purged.sort_unstable();

        if !purged.is_empty() {
            info!(count = purged.len(), "purged removed hosts");
        }
        purged
    }
}

/// Periodically sweep expired hosts until cancelled. Picks up a changed
/// purge interval on the next tick.
pub(crate) async fn purge_task(engine: Engine, cancel: CancellationToken) {
    let mut period = engine.settings().purge_interval;
    let mut interval = sweep_interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                engine.purge_expired(Utc::now());

                let next = engine.settings().purge_interval;
                if next != period {
                    debug!(?period, ?next, "purge interval changed");
                    period = next;
                    interval = sweep_interval(period);
                    interval.tick().await;
                }
            }
        }
    }
}

fn sweep_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
