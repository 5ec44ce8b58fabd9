//! Expiry and admission policies.
//!
//! This module defines the value types that parameterize the cache and the
//! rate limiter: how long an entry may live, how large a rate window is, what
//! the limiter decided, and what it does when the store is unreachable.

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;
use thiserror::Error;

/// Error returned when a policy value is out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A cache TTL of zero seconds was requested
    #[error("ttl must be at least one second")]
    ZeroTtl,
    /// A rate window of zero seconds was requested
    #[error("rate window must be at least one second")]
    ZeroWindow,
    /// A request limit of zero was requested
    #[error("max requests must be greater than 0")]
    ZeroMaxRequests,
}

/// Time-to-live of a cache entry, in whole seconds.
///
/// There is no way to express "never expires": every cached value carries a
/// TTL, which bounds both staleness and memory growth.
///
/// # Example
/// ```
/// use cache_throttle::Ttl;
///
/// let ttl = Ttl::from_secs(3600).unwrap();
/// assert_eq!(ttl.as_secs(), 3600);
/// assert!(Ttl::from_secs(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ttl(NonZeroU64);

impl Ttl {
    /// Create a TTL of `secs` seconds.
    ///
    /// # Errors
    /// Returns [`PolicyError::ZeroTtl`] if `secs` is zero.
    pub fn from_secs(secs: u64) -> Result<Self, PolicyError> {
        NonZeroU64::new(secs).map(Self).ok_or(PolicyError::ZeroTtl)
    }

    /// Create a TTL from a duration, rounding sub-second parts up.
    ///
    /// # Errors
    /// Returns [`PolicyError::ZeroTtl`] if `duration` is zero.
    pub fn from_duration(duration: Duration) -> Result<Self, PolicyError> {
        let mut secs = duration.as_secs();
        if duration.subsec_nanos() > 0 {
            secs = secs.saturating_add(1);
        }
        Self::from_secs(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0.get()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0.get())
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Fixed-window admission policy: at most `max_requests` per `window`.
///
/// Windows are consecutive and non-overlapping. A client may spend its full
/// allowance at the end of one window and again at the start of the next,
/// so the effective burst at a boundary is twice `max_requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowPolicy {
    window: Ttl,
    max_requests: NonZeroU64,
}

impl WindowPolicy {
    /// Create a window policy.
    ///
    /// # Errors
    /// Returns an error if `window_secs` or `max_requests` is zero.
    pub fn new(window_secs: u64, max_requests: u64) -> Result<Self, PolicyError> {
        let window = Ttl::from_secs(window_secs).map_err(|_| PolicyError::ZeroWindow)?;
        let max_requests = NonZeroU64::new(max_requests).ok_or(PolicyError::ZeroMaxRequests)?;
        Ok(Self {
            window,
            max_requests,
        })
    }

    /// Window length; also the expiry armed on each new counter.
    pub fn window(&self) -> Ttl {
        self.window
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests.get()
    }

    /// Decide for a post-increment counter value.
    ///
    /// `remaining` is the counter's remaining lifetime, used as the retry hint
    /// and clamped into `[0, window]`.
    pub fn decide(&self, count: u64, remaining: Option<Duration>) -> RateDecision {
        if count <= self.max_requests() {
            return RateDecision::Admitted;
        }
        let window = self.window.as_duration();
        let retry_after = remaining.map_or(window, |r| r.min(window));
        RateDecision::Rejected { retry_after }
    }
}

/// Outcome of a rate limiting check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed
    Admitted,
    /// The request exceeded its window's allowance
    Rejected {
        /// Estimated time until the current window closes
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Check if this decision is Admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted)
    }

    /// Check if this decision is Rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, RateDecision::Rejected { .. })
    }

    /// Retry hint in whole seconds, rounded up; `None` when admitted.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateDecision::Admitted => None,
            RateDecision::Rejected { retry_after } => {
                let mut secs = retry_after.as_secs();
                if retry_after.subsec_nanos() > 0 {
                    secs += 1;
                }
                Some(secs)
            }
        }
    }
}

/// What the limiter answers when the store cannot be consulted.
///
/// A built limiter always carries one of these. The default is
/// [`FailurePolicy::FailOpen`]: a store outage degrades protection instead of
/// rejecting every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request
    #[default]
    FailOpen,
    /// Reject the request, suggesting a retry after `retry_after`
    FailClosed {
        /// Retry hint handed to rejected callers
        retry_after: Duration,
    },
}

impl FailurePolicy {
    /// Fail closed with the window length as retry hint.
    pub fn fail_closed_for(policy: &WindowPolicy) -> Self {
        FailurePolicy::FailClosed {
            retry_after: policy.window().as_duration(),
        }
    }

    /// The decision to apply when the store failed.
    pub fn decision(&self) -> RateDecision {
        match *self {
            FailurePolicy::FailOpen => RateDecision::Admitted,
            FailurePolicy::FailClosed { retry_after } => RateDecision::Rejected { retry_after },
        }
    }
}
