//! Background upkeep: expiring silent instances and pruning heartbeat history

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use beacon_core::Result;

use crate::discovery::{HeartbeatService, ServiceRegistry};

pub struct Maintenance {
    registry: Arc<ServiceRegistry>,
    heartbeats: Arc<HeartbeatService>,
    heartbeat_timeout: chrono::Duration,
    cleanup_every: Duration,
    prune_every: Duration,
}

impl Maintenance {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        heartbeats: Arc<HeartbeatService>,
        heartbeat_timeout: chrono::Duration,
        cleanup_every: Duration,
        prune_every: Duration,
    ) -> Self {
        Self {
            registry,
            heartbeats,
            heartbeat_timeout,
            cleanup_every,
            prune_every,
        }
    }

    /// One cleanup pass; returns the number of instances marked inactive
    pub async fn run_cleanup(&self) -> Result<usize> {
        self.registry.cleanup_inactive(self.heartbeat_timeout).await
    }

    /// One prune pass; returns the number of heartbeat records dropped
    pub fn run_prune(&self) -> usize {
        self.heartbeats.prune(self.registry.clock().now())
    }

    /// Spawn the cleanup and prune loops. Both exit when `cancel_token` fires.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        let cleanup = {
            let this = self.clone();
            let token = cancel_token.clone();
            let mut timer = interval(self.cleanup_every.max(Duration::from_millis(1)));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => {
                            tracing::info!("Registry cleanup loop shutting down");
                            return;
                        }
                        _ = timer.tick() => {
                            if let Err(e) = this.run_cleanup().await {
                                tracing::error!("Inactive instance cleanup failed: {}", e);
                            }
                        }
                    }
                }
            })
        };

        let prune = {
            let this = self.clone();
            let mut timer = interval(self.prune_every.max(Duration::from_millis(1)));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            tracing::info!("Heartbeat prune loop shutting down");
                            return;
                        }
                        _ = timer.tick() => {
                            this.run_prune();
                        }
                    }
                }
            })
        };

        vec![cleanup, prune]
    }
}
