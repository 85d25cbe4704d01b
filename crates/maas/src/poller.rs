//! Blocking wait for asynchronous MAAS state transitions.
//!
//! MAAS commissions, deploys and releases machines in the background. Every
//! lifecycle operation that triggers one of those transitions parks here
//! until the machine reaches a target state, reports something unexpected,
//! or the timeout runs out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::ProviderError;

/// Starting re-poll interval before the minimum interval is applied.
const BASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound of the exponential re-poll interval.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Timing of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitTiming {
    /// Overall time budget, including the initial delay.
    pub timeout_secs: u64,
    /// Sleep before the first refresh.
    pub delay_secs: u64,
    /// Lower bound for the interval between refreshes.
    pub min_interval_secs: u64,
}

impl WaitTiming {
    #[must_use]
    pub const fn new(timeout_secs: u64, delay_secs: u64, min_interval_secs: u64) -> Self {
        Self {
            timeout_secs,
            delay_secs,
            min_interval_secs,
        }
    }

    fn timeout(self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn delay(self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    fn min_interval(self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

/// Pending and target states of a wait.
#[derive(Debug, Clone)]
pub struct StateChangeConf<S> {
    pub pending: Vec<S>,
    pub target: Vec<S>,
    pub timing: WaitTiming,
}

impl<S: Display> StateChangeConf<S> {
    #[must_use]
    pub fn new(pending: Vec<S>, target: Vec<S>, timing: WaitTiming) -> Self {
        Self {
            pending,
            target,
            timing,
        }
    }

    fn awaiting(&self) -> String {
        self.target
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Interval before refresh number `attempt + 1`.
fn poll_interval(attempt: u32, min_interval: Duration) -> Duration {
    let backoff = BASE_POLL_INTERVAL
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_POLL_INTERVAL);
    backoff.max(min_interval)
}

/// Refresh until the state reaches one of `conf.target`.
///
/// `refresh` returns the current object and its state. The object observed
/// together with the target state is returned.
///
/// # Errors
///
/// - [`ProviderError::UnexpectedState`] as soon as a state outside both sets is seen
/// - [`ProviderError::WaitTimeout`] when the timeout elapses while pending
/// - any error returned by `refresh`, unchanged
pub async fn wait_for_state<T, S, F, Fut>(
    resource: &str,
    conf: &StateChangeConf<S>,
    mut refresh: F,
) -> Result<T, ProviderError>
where
    S: PartialEq + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(T, S), ProviderError>>,
{
    let awaiting = conf.awaiting();
    let timeout = conf.timing.timeout();
    info!(
        resource,
        awaiting = %awaiting,
        timeout_secs = conf.timing.timeout_secs,
        "Waiting for state change"
    );

    let start = Instant::now();
    sleep(conf.timing.delay()).await;

    let mut attempt = 0u32;
    loop {
        let (object, state) = refresh().await?;

        debug!(
            resource,
            state = %state,
            elapsed_secs = start.elapsed().as_secs(),
            "Polled state"
        );

        if conf.target.contains(&state) {
            info!(resource, state = %state, "Reached target state");
            return Ok(object);
        }

        if !conf.pending.contains(&state) {
            return Err(ProviderError::UnexpectedState {
                resource: resource.to_string(),
                state: state.to_string(),
                awaiting,
            });
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProviderError::WaitTimeout {
                resource: resource.to_string(),
                awaiting,
                last_state: state.to_string(),
                timeout_secs: conf.timing.timeout_secs,
            });
        }

        let interval = poll_interval(attempt, conf.timing.min_interval());
        sleep(interval.min(timeout - elapsed)).await;
        attempt = attempt.saturating_add(1);
    }
}
