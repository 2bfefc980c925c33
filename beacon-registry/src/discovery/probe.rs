//! Reachability probes used by active health checks

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use beacon_core::models::Instance;

/// Result of a single probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    #[must_use]
    pub const fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// A single reachability check against one instance.
///
/// Only an explicit success counts as healthy; implementations report
/// timeouts and connection errors as failures with the error preserved.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, instance: &Instance, timeout: Duration) -> ProbeOutcome;
}

/// TCP connect probe against `address:port`
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, instance: &Instance, timeout: Duration) -> ProbeOutcome {
        let addr = instance.endpoint();
        let started = Instant::now();

        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => ProbeOutcome::success(started.elapsed()),
            Ok(Err(e)) => ProbeOutcome::failure(started.elapsed(), format!("connect to {addr} failed: {e}")),
            Err(_) => ProbeOutcome::failure(
                started.elapsed(),
                format!("connect to {addr} timed out after {}ms", timeout.as_millis()),
            ),
        }
    }
}

/// Probe backed by a synchronous check function
pub struct FnProbe<F> {
    check: F,
}

impl<F> FnProbe<F>
where
    F: Fn(&Instance) -> Result<(), String> + Send + Sync + 'static,
{
    pub const fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> Probe for FnProbe<F>
where
    F: Fn(&Instance) -> Result<(), String> + Send + Sync + 'static,
{
    async fn probe(&self, instance: &Instance, _timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        match (self.check)(instance) {
            Ok(()) => ProbeOutcome::success(started.elapsed()),
            Err(e) => ProbeOutcome::failure(started.elapsed(), e),
        }
    }
}
