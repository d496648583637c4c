//! Keepalive ping policing.
//!
//! # Responsibilities
//! - Enforce a minimum interval between PINGs received from a peer
//! - Count violations as strikes instead of failing on the first one
//! - Report when a peer has exceeded the allowed number of strikes
//!
//! # Design Decisions
//! - Without open streams (and unless allowed) a much longer interval applies
//! - Strikes only reset explicitly, see [`KeepaliveTracker::reset`]

use std::time::Duration;

use tokio::time::Instant;

/// Minimum interval between pings while streams are open.
pub const DEFAULT_MIN_PING_RECEIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Interval enforced when no stream is open and such pings are not allowed.
pub const PING_INTERVAL_WITHOUT_STREAMS: Duration = Duration::from_secs(2 * 60 * 60);

/// Strikes tolerated before a peer is considered abusive.
pub const DEFAULT_MAX_PING_STRIKES: u32 = 2;

/// Keepalive settings for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepalivePolicy {
    /// Apply `min_ping_receive_interval` even when no stream is open.
    pub allow_pings_without_open_streams: bool,
    pub min_ping_receive_interval: Duration,
    pub max_ping_strikes: u32,
}

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self {
            allow_pings_without_open_streams: false,
            min_ping_receive_interval: DEFAULT_MIN_PING_RECEIVE_INTERVAL,
            max_ping_strikes: DEFAULT_MAX_PING_STRIKES,
        }
    }
}

/// Tracks the ping cadence of one peer.
#[derive(Debug, Clone)]
pub struct KeepaliveTracker {
    policy: KeepalivePolicy,
    last_valid_ping: Option<Instant>,
    ping_strikes: u32,
}

impl KeepaliveTracker {
    /// Create a tracker with no pings seen.
    pub fn new(policy: KeepalivePolicy) -> Self {
        Self {
            policy,
            last_valid_ping: None,
            ping_strikes: 0,
        }
    }

    /// Record a PING received at `now`. Returns `true` when the peer sent too many.
    pub fn received_ping(&mut self, now: Instant, has_open_streams: bool) -> bool {
        let interval = if has_open_streams || self.policy.allow_pings_without_open_streams {
            self.policy.min_ping_receive_interval
        } else {
            PING_INTERVAL_WITHOUT_STREAMS
        };

        let acceptable = match self.last_valid_ping {
            None => true,
            // An interval too large to represent is never satisfied.
            Some(last) => last.checked_add(interval).is_some_and(|due| due <= now),
        };

        if acceptable {
            self.last_valid_ping = Some(now);
            false
        } else {
            self.ping_strikes += 1;
            self.ping_strikes > self.policy.max_ping_strikes
        }
    }

    /// Forget previous pings and strikes.
    ///
    /// Called when the server writes HEADERS or DATA: a peer pinging an active
    /// connection is not abusive.
    pub fn reset(&mut self) {
        self.last_valid_ping = None;
        self.ping_strikes = 0;
    }

    /// Get the current strike count.
    pub fn ping_strikes(&self) -> u32 {
        self.ping_strikes
    }
}

impl Default for KeepaliveTracker {
    fn default() -> Self {
        Self::new(KeepalivePolicy::default())
    }
}
