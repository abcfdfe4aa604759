//! Fixed-interval condition polling with a deadline
//!
//! This is the primitive underneath every wait in this crate: invoke a probe
//! immediately, then at a fixed interval, until it reports success, fails
//! fatally, or the deadline elapses. Transient collaborator errors are
//! swallowed and retried; the last "not yet" diagnostic is retained so a
//! timeout can explain why convergence never happened.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use converge::{poll_immediate, Error, PollConfig, Probe};
//!
//! let config = PollConfig::new(Duration::from_secs(10), Duration::from_secs(300));
//! let address = poll_immediate(config, "load balancer provisioned", Error::is_retryable, || async {
//!     match lb.current_address().await? {
//!         Some(addr) => Ok(Probe::Ready(addr)),
//!         None => Ok(Probe::Pending("no address assigned yet".to_string())),
//!     }
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::Error;

/// Default sleep between probe invocations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for one polling session
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Immutable configuration for one polling session
///
/// Constructed per call site, used for exactly one session, and discarded.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    /// Sleep duration between probe invocations
    pub interval: Duration,
    /// Maximum wall-clock time for the session
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollConfig {
    /// Create a config with an explicit interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Keep the default interval but bound the session by `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Outcome of a single probe invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<T> {
    /// The condition is met; polling stops and yields the value
    Ready(T),
    /// Not yet converged; the reason is retained and reported if the
    /// deadline expires first
    Pending(String),
}

/// Poll a probe at a fixed interval until it succeeds or the deadline elapses.
///
/// The probe runs immediately (no initial delay) and then once per
/// `config.interval`, each time against up-to-date remote state. Errors it
/// returns are classified with `is_retryable` right at the collaborator
/// boundary: a retryable error is treated as "not yet" and its message
/// retained, a fatal one aborts the session and propagates untouched. When
/// the deadline expires the returned [`Error::DeadlineExceeded`] names
/// `condition` and carries the most recent diagnostic, so the caller can see
/// why convergence never happened.
///
/// # Arguments
/// * `config` - Interval and deadline for this session
/// * `condition` - Human-readable description of what is being awaited
/// * `is_retryable` - Classifier for errors observed while probing
/// * `probe` - Async closure checked each iteration
pub async fn poll_immediate<T, F, Fut, C>(
    config: PollConfig,
    condition: &str,
    is_retryable: C,
    mut probe: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, Error>>,
    C: Fn(&Error) -> bool,
{
    let start = Instant::now();
    let mut last_reason: Option<String> = None;

    loop {
        if start.elapsed() > config.timeout {
            return Err(Error::deadline_exceeded(
                condition,
                config.timeout,
                last_reason,
            ));
        }

        match probe().await {
            Ok(Probe::Ready(value)) => return Ok(value),
            Ok(Probe::Pending(reason)) => {
                trace!(condition, reason = %reason, "condition not yet met");
                last_reason = Some(reason);
            }
            Err(err) if is_retryable(&err) => {
                debug!(condition, error = %err, "transient error while probing, will retry");
                last_reason = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }

        tokio::time::sleep(config.interval).await;
    }
}
