//! Time types for KILN.
//!
//! `Timestamp` is wall-clock capture time for messages. `Deadline` is the
//! single absolute value a cancellation deadline is reduced to before it
//! crosses the boundary.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the unix epoch
    pub seconds: u64,
    /// Sub-second nanoseconds
    pub nanos: u32,
}

impl Timestamp {
    /// Maximum nanoseconds per second
    pub const NANOS_PER_SEC: u32 = 1_000_000_000;

    /// Create a new timestamp
    #[must_use]
    pub const fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Get current timestamp
    #[must_use]
    pub fn now() -> Self {
        // A clock before 1970 collapses to the epoch
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }

    /// Create from unix milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            seconds: millis / 1_000,
            nanos: ((millis % 1_000) * 1_000_000) as u32,
        }
    }

    /// Convert to unix milliseconds, saturating
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.seconds
            .saturating_mul(1_000)
            .saturating_add(u64::from(self.nanos / 1_000_000))
    }

    /// Duration since an earlier timestamp, zero if `earlier` is later
    #[must_use]
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        let this = Duration::new(self.seconds, self.nanos);
        let other = Duration::new(earlier.seconds, earlier.nanos);
        this.saturating_sub(other)
    }

    /// Add a duration
    #[must_use]
    pub fn add(&self, duration: Duration) -> Self {
        let total = Duration::new(self.seconds, self.nanos).saturating_add(duration);
        Self {
            seconds: total.as_secs(),
            nanos: total.subsec_nanos(),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Absolute deadline in unix milliseconds.
///
/// The boundary has no channel or signal primitive, so a caller's
/// cancellation is reduced to this one value. An expired deadline is still
/// a valid deadline; honouring it is up to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Deadline(u64);

impl Deadline {
    /// Raw value meaning "no deadline"
    pub const NONE_RAW: u64 = u64::MAX;

    /// No deadline
    #[must_use]
    pub const fn none() -> Self {
        Self(Self::NONE_RAW)
    }

    /// Deadline at an absolute timestamp
    #[must_use]
    pub fn at(ts: Timestamp) -> Self {
        Self(ts.as_millis().min(Self::NONE_RAW - 1))
    }

    /// Deadline `timeout` from now
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self::at(Timestamp::now().add(timeout))
    }

    /// Rebuild from the wire value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Wire value
    #[must_use]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Whether a deadline is set
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.0 != Self::NONE_RAW
    }

    /// Whether the deadline has passed at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.is_set() && now.as_millis() >= self.0
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Timestamp::now())
    }

    /// Time left until the deadline. `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        if !self.is_set() {
            return None;
        }
        let now = Timestamp::now().as_millis();
        Some(Duration::from_millis(self.0.saturating_sub(now)))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
