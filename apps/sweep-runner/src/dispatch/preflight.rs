//! Pre-flight reachability check.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::error::DispatchError;
use super::port::BacktestPort;

/// Bounded wait for the endpoint to accept connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightPolicy {
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay between probes.
    pub poll_interval: Duration,
}

impl Default for PreflightPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Probe until the endpoint answers, the bound expires, or `cancel` fires.
pub async fn wait_until_reachable<P: BacktestPort + ?Sized>(
    port: &P,
    policy: PreflightPolicy,
    cancel: &CancellationToken,
) -> Result<(), DispatchError> {
    let started = Instant::now();
    let mut probes = 0u32;

    loop {
        probes += 1;
        let last_error = match port.probe().await {
            Ok(()) => {
                tracing::info!(
                    endpoint = %port.endpoint(),
                    probes,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Backtesting endpoint reachable"
                );
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(DispatchError::EndpointUnreachable {
                endpoint: port.endpoint(),
                waited_secs: elapsed.as_secs(),
                last_error,
            });
        }

        tracing::debug!(error = %last_error, probes, "Endpoint not reachable yet");
        let pause = policy.poll_interval.min(policy.timeout.saturating_sub(elapsed));
        tokio::select! {
            () = cancel.cancelled() => return Err(DispatchError::CancelledBeforeStart),
            () = tokio::time::sleep(pause) => {}
        }
    }
}
