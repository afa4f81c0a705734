//! Dial deadline handling
//!
//! A single effective timeout bounds transport connect, proxy tunnel and TLS handshake.

use crate::{Error, Result};
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

/// Dialer settings shared by every dial made through it.
///
/// Both `timeout` and `deadline` may be set; the earlier of the two applies.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    /// Maximum duration of a whole dial (zero = no timeout)
    pub timeout: Option<Duration>,
    /// Absolute point in time by which a dial must complete
    pub deadline: Option<Instant>,
    /// Set TCP_NODELAY on connected streams
    pub nodelay: bool,
}

impl Dialer {
    /// Create a dialer with no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dial timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the absolute dial deadline
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Effective timeout for a dial starting now.
    ///
    /// `None` means no timeout. A deadline that has already passed yields
    /// `Some(Duration::ZERO)`, which fails the dial immediately.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.effective_timeout_at(Instant::now())
    }

    fn effective_timeout_at(&self, now: Instant) -> Option<Duration> {
        let timeout = self.timeout.filter(|t| !t.is_zero());

        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                match timeout {
                    Some(t) if t <= remaining => Some(t),
                    _ => Some(remaining),
                }
            }
            None => timeout,
        }
    }

    /// Absolute point by which a dial starting now must complete.
    ///
    /// Anchored once, before any setup, so everything the dial does afterwards counts
    /// against it.
    pub fn effective_deadline(&self) -> Option<tokio::time::Instant> {
        let now = Instant::now();
        self.effective_timeout_at(now)
            .map(|t| tokio::time::Instant::from_std(now + t))
    }
}

/// Run `establish` bounded by `deadline`.
///
/// Without a deadline the future runs inline. Otherwise it runs as a spawned task raced
/// against a timer; if the timer wins, the task is aborted, dropping whatever transport it
/// holds, and `Error::Timeout` is returned. A task finishing after the timer fired is never
/// observed.
pub(crate) async fn race<F, T>(deadline: Option<tokio::time::Instant>, establish: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let deadline = match deadline {
        Some(deadline) => deadline,
        None => return establish.await,
    };

    if deadline <= tokio::time::Instant::now() {
        return Err(Error::Timeout);
    }

    let mut task = tokio::spawn(establish);
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
        Ok(Err(join_err)) => Err(Error::Io(io::Error::other(join_err))),
        Err(_) => {
            task.abort();
            tracing::debug!("dial deadline elapsed");
            Err(Error::Timeout)
        }
    }
}
