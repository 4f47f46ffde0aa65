//! Post-restore health probing
//!
//! After a tier's data load the probe polls every endpoint the service
//! registry declares for that tier, concurrently within a round, until all
//! of them agree or the timeout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::tier::{Tier, TIER_GRAPH};

pub mod endpoint;

pub use endpoint::{HealthEndpoint, PostgresEndpoint, TcpEndpoint};

/// Outcome of probing one tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub tier: Tier,
    pub healthy: bool,
    pub last_error: Option<String>,
    /// Polling rounds performed
    pub rounds: u32,
    pub elapsed_ms: u64,
}

/// Source of the health endpoints each tier declares
pub trait ServiceRegistry: Send + Sync {
    fn endpoints(&self, tier: Tier) -> Vec<Arc<dyn HealthEndpoint>>;
}

/// Registry with a fixed endpoint list per tier
#[derive(Default, Clone)]
pub struct StaticServiceRegistry {
    endpoints: HashMap<Tier, Vec<Arc<dyn HealthEndpoint>>>,
}

impl StaticServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, tier: Tier, endpoint: Arc<dyn HealthEndpoint>) -> Self {
        self.register(tier, endpoint);
        self
    }

    pub fn register(&mut self, tier: Tier, endpoint: Arc<dyn HealthEndpoint>) {
        self.endpoints.entry(tier).or_default().push(endpoint);
    }
}

impl ServiceRegistry for StaticServiceRegistry {
    fn endpoints(&self, tier: Tier) -> Vec<Arc<dyn HealthEndpoint>> {
        self.endpoints.get(&tier).cloned().unwrap_or_default()
    }
}

/// Polls a tier's health endpoints at a fixed interval
#[derive(Clone)]
pub struct HealthProbe {
    registry: Arc<dyn ServiceRegistry>,
    poll_interval: Duration,
}

impl HealthProbe {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll until every endpoint reports healthy or `timeout` elapses
    ///
    /// A tier without endpoints is healthy immediately.
    #[instrument(skip(self), fields(tier = %tier))]
    pub async fn check(&self, tier: Tier, timeout: Duration) -> HealthResult {
        let endpoints = self.registry.endpoints(tier);
        let started = Instant::now();

        if endpoints.is_empty() {
            debug!(tier = %tier, "No health endpoints declared, treating tier as healthy");
            return HealthResult {
                tier,
                healthy: true,
                last_error: None,
                rounds: 0,
                elapsed_ms: 0,
            };
        }

        let deadline = deadline_after(started, timeout);
        let mut rounds = 0u32;
        let mut last_error = None;

        loop {
            rounds += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());

            let outcomes = join_all(endpoints.iter().map(|endpoint| {
                let endpoint = Arc::clone(endpoint);
                async move {
                    let outcome = match tokio::time::timeout(remaining, endpoint.probe()).await {
                        Ok(result) => result,
                        Err(_) => Err("probe timed out".to_string()),
                    };
                    (endpoint.name().to_string(), outcome)
                }
            }))
            .await;

            let failures: Vec<String> = outcomes
                .into_iter()
                .filter_map(|(name, outcome)| outcome.err().map(|e| format!("{}: {}", name, e)))
                .collect();

            if failures.is_empty() {
                info!(tier = %tier, rounds, "Tier reported healthy");
                return HealthResult {
                    tier,
                    healthy: true,
                    last_error: None,
                    rounds,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
            }

            debug!(tier = %tier, round = rounds, failures = ?failures, "Tier not yet healthy");
            last_error = failures.into_iter().next();

            let next_round = Instant::now().checked_add(self.poll_interval);
            if next_round.map_or(true, |next| next >= deadline) {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(tier = %tier, rounds, last_error = ?last_error, "Tier did not become healthy before timeout");
        HealthResult {
            tier,
            healthy: false,
            last_error,
            rounds,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Probe every known tier concurrently, reported in topological order
    pub async fn check_all(&self, timeout: Duration) -> Vec<HealthResult> {
        join_all(TIER_GRAPH.order().iter().map(|tier| self.check(*tier, timeout))).await
    }
}

/// Roughly thirty years; stands in for timeouts too large for an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating instead of overflowing
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}
