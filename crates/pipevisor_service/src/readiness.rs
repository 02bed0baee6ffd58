//! Bounded readiness polling.
//!
//! Every wait has a fixed attempt budget and a fixed delay between attempts.
//! Exhausting the budget is always reported as [`ReadinessTimeout`].

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use crate::monitoring::MonitoringApi;

/// Default number of probe attempts.
pub const RETRY_ATTEMPTS: u32 = 60;

/// Default delay between attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempt budget and inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: RETRY_ATTEMPTS,
            interval: RETRY_INTERVAL,
        }
    }
}

impl ReadinessPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Nominal wall-clock budget (`attempts * interval`).
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// The budget was exhausted without a successful probe
#[derive(Debug, Clone, thiserror::Error)]
#[error("{what} did not come up after {attempts} attempts ({budget:?} budget, {elapsed:?} elapsed)")]
pub struct ReadinessTimeout {
    pub what: String,
    pub attempts: u32,
    pub budget: Duration,
    pub elapsed: Duration,
}

/// A single liveness check.
///
/// A probe never fails hard: any error while probing means "not yet".
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn describe(&self) -> String;

    async fn probe(&self) -> bool;
}

/// Probe `probe` until it succeeds or `policy.attempts` probes have failed.
///
/// Returns the 1-based attempt that succeeded.
pub async fn poll_until<P>(probe: &P, policy: ReadinessPolicy) -> Result<u32, ReadinessTimeout>
where
    P: ReadinessProbe + ?Sized,
{
    let started = Instant::now();
    for attempt in 1..=policy.attempts {
        if probe.probe().await {
            log::debug!("{} ready after {} attempt(s)", probe.describe(), attempt);
            return Ok(attempt);
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ReadinessTimeout {
        what: probe.describe(),
        attempts: policy.attempts,
        budget: policy.budget(),
        elapsed: started.elapsed(),
    })
}

/// Bare TCP connect to the monitoring port
#[derive(Debug, Clone)]
pub struct PortProbe {
    pub host: String,
    pub port: u16,
}

impl PortProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl ReadinessProbe for PortProbe {
    fn describe(&self) -> String {
        format!("port {}:{}", self.host, self.port)
    }

    async fn probe(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        matches!(tokio::time::timeout(CONNECT_TIMEOUT, connect).await, Ok(Ok(_)))
    }
}

/// Application-level probe: the monitoring API answers a node-info request
pub struct ApiProbe<'a> {
    api: &'a MonitoringApi,
}

impl<'a> ApiProbe<'a> {
    pub fn new(api: &'a MonitoringApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ReadinessProbe for ApiProbe<'_> {
    fn describe(&self) -> String {
        format!("monitoring API at {}", self.api.base_url())
    }

    async fn probe(&self) -> bool {
        match self.api.node_info().await {
            Ok(_) => true,
            Err(e) => {
                log::trace!("Monitoring API not ready: {}", e);
                false
            }
        }
    }
}
