//! Independent background trigger sources. Each source runs at most one unit of work at a time;
//! different sources run in parallel and a failing run never stops its loop.

mod maintenance;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::generation::ReachabilityCheck;
use crate::settings::NetworkConstraint;
use crate::upload::UploadQueue;

pub use maintenance::{run_maintenance, MaintenanceReport};

pub struct TriggerSet {
    cancel_token: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSet {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Run `job` every `every`, first run after one full period.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &str, every: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel_token = self.cancel_token.clone();
        let label = name.to_string();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("trigger {label} firing");
                        job().await;
                    }
                }
            }
            info!("trigger {label} stopped");
        });
        self.handles.push((name.to_string(), handle));
    }

    /// Drain `queue` whenever the network constraint holds: on a fixed cadence and right after
    /// something is enqueued.
    pub fn spawn_network_drain(
        &mut self,
        queue: UploadQueue,
        constraint: NetworkConstraint,
        reachability: Arc<dyn ReachabilityCheck>,
        every: Duration,
    ) {
        let cancel_token = self.cancel_token.clone();
        let wake = queue.wake_handle();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }

                if !constraint_met(constraint, reachability.as_ref()).await {
                    debug!("network constraint {constraint:?} unmet; not draining");
                    continue;
                }
                if let Err(err) = queue.drain().await {
                    warn!("upload drain failed: {err:?}");
                }
            }
            info!("trigger upload-drain stopped");
        });
        self.handles.push(("upload-drain".into(), handle));
    }

    /// Stop every source and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                warn!("trigger {name} ended abnormally: {err}");
            }
        }
    }
}

pub async fn constraint_met(constraint: NetworkConstraint, reachability: &dyn ReachabilityCheck) -> bool {
    match constraint {
        NetworkConstraint::Disabled => false,
        NetworkConstraint::Connected => reachability.is_reachable().await,
    }
}
