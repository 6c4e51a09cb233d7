//! Server-informed rate-limit tracking.
//!
//! The backend advertises its limits through standard response headers. This
//! tracker remembers the latest advertised state per identity and blocks a
//! request before it is sent when the server already said no. Entries are
//! never actively expired: every response overwrites the previous state, so
//! staleness resolves itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use http::HeaderMap;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::errors::RateLimitScope;
use crate::limits::rate::RateDecision;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Latest advertised rate-limit state for one identity. Absent headers stay
/// `None`, which never blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Epoch seconds at which the window resets.
    pub reset_at: Option<i64>,
    /// Server-instructed wait, in seconds.
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitState {
    /// Parse from response headers. Unparseable or missing values degrade to
    /// `None` rather than erroring; a server that sends no limit headers must
    /// never cause blocking.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_num(headers, HEADER_LIMIT),
            remaining: header_num(headers, HEADER_REMAINING),
            reset_at: header_num(headers, HEADER_RESET),
            retry_after_seconds: header_num(headers, HEADER_RETRY_AFTER),
        }
    }
}

fn header_num<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    let raw = headers.get(name)?.to_str().ok()?.trim();
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(header = name, value = raw, "unparseable rate-limit header");
            None
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    per_identity: HashMap<String, RateLimitState>,
    /// Epoch milliseconds until which every request is blocked.
    global_cooldown_until_ms: Option<i64>,
}

/// Cheap-clone handle over the shared tracker state.
#[derive(Clone)]
pub struct RateLimitTracker {
    state: Arc<Mutex<TrackerState>>,
    config: TrackerConfig,
}

impl RateLimitTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            config,
        }
    }

    /// Record the rate-limit headers of a response for `identity`.
    pub fn record_response(&self, identity: &str, headers: &HeaderMap) {
        let parsed = RateLimitState::from_headers(headers);
        let mut state = self.lock();
        state.per_identity.insert(identity.to_string(), parsed);
    }

    /// Start the global cooldown, e.g. after a 429. Without an explicit
    /// `retry_after` the configured default applies.
    pub fn record_rate_limited(&self, retry_after: Option<Duration>) {
        let wait = retry_after.unwrap_or(self.config.default_cooldown());
        let until = Utc::now().timestamp_millis() + wait.as_millis() as i64;
        let mut state = self.lock();
        state.global_cooldown_until_ms = Some(until);
        drop(state);

        warn!(wait_ms = wait.as_millis() as u64, "global request cooldown started");
        metrics::counter!("ledger_server_rate_limits_total").increment(1);
    }

    /// Pre-submission check. Blocks while the global cooldown runs, or when
    /// the server said `remaining: 0` and the reset is still in the future.
    /// The wait comes from `Retry-After` when present, otherwise from the
    /// reset timestamp, clamped to non-negative.
    pub fn can_make_request(&self, identity: &str) -> RateDecision {
        let mut state = self.lock();
        let now_ms = Utc::now().timestamp_millis();

        if let Some(until) = state.global_cooldown_until_ms {
            if now_ms < until {
                return RateDecision::Blocked {
                    retry_after: Duration::from_millis((until - now_ms) as u64),
                    scope: RateLimitScope::Server,
                };
            }
            state.global_cooldown_until_ms = None;
        }

        let Some(tracked) = state.per_identity.get(identity) else {
            return RateDecision::Allowed;
        };

        if tracked.remaining == Some(0) {
            if let Some(reset_at) = tracked.reset_at {
                // Saturate throughout: a parseable-but-absurd header value
                // must produce a long wait, never a panic or a zero wait.
                let reset_ms = reset_at.saturating_mul(1_000);
                if reset_ms > now_ms {
                    let wait_ms = tracked
                        .retry_after_seconds
                        .map(|s| i64::try_from(s.saturating_mul(1_000)).unwrap_or(i64::MAX))
                        .unwrap_or(reset_ms - now_ms)
                        .max(0) as u64;
                    return RateDecision::Blocked {
                        retry_after: Duration::from_millis(wait_ms),
                        scope: RateLimitScope::Server,
                    };
                }
            }
        }

        RateDecision::Allowed
    }

    pub fn tracked_state(&self, identity: &str) -> Option<RateLimitState> {
        self.lock().per_identity.get(identity).copied()
    }

    /// Wipe all tracked state. Test teardown and remount hygiene.
    pub fn reset(&self) {
        *self.lock() = TrackerState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http::HeaderValue;

    fn tracker() -> RateLimitTracker {
        RateLimitTracker::new(Config::default().tracker)
    }

    fn headers(entries: &[(&str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_absent_headers_stay_permissive() {
        let tracker = tracker();
        tracker.record_response("wallet1", &HeaderMap::new());

        assert_eq!(tracker.tracked_state("wallet1"), Some(RateLimitState::default()));
        assert!(tracker.can_make_request("wallet1").is_allowed());
        // Never-seen identities are permissive too.
        assert!(tracker.can_make_request("wallet2").is_allowed());
    }

    #[test]
    fn test_parses_standard_headers() {
        let tracker = tracker();
        let reset = Utc::now().timestamp() + 30;
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_LIMIT, "100".to_string()),
                (HEADER_REMAINING, "42".to_string()),
                (HEADER_RESET, reset.to_string()),
            ]),
        );

        let state = tracker.tracked_state("wallet1").unwrap();
        assert_eq!(state.limit, Some(100));
        assert_eq!(state.remaining, Some(42));
        assert_eq!(state.reset_at, Some(reset));
        assert_eq!(state.retry_after_seconds, None);
        assert!(tracker.can_make_request("wallet1").is_allowed());
    }

    #[test]
    fn test_garbage_header_values_are_ignored() {
        let tracker = tracker();
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_LIMIT, "not-a-number".to_string()),
                (HEADER_REMAINING, "-5".to_string()),
            ]),
        );

        assert_eq!(tracker.tracked_state("wallet1"), Some(RateLimitState::default()));
        assert!(tracker.can_make_request("wallet1").is_allowed());
    }

    #[test]
    fn test_exhausted_with_future_reset_blocks() {
        let tracker = tracker();
        let reset = Utc::now().timestamp() + 30;
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, reset.to_string()),
            ]),
        );

        match tracker.can_make_request("wallet1") {
            RateDecision::Blocked { retry_after, scope } => {
                assert_eq!(scope, RateLimitScope::Server);
                let wait_ms = retry_after.as_millis();
                assert!(wait_ms > 28_000 && wait_ms <= 30_000, "wait {wait_ms}ms");
            }
            other => panic!("expected server block, got {:?}", other),
        }
        // Other identities are unaffected.
        assert!(tracker.can_make_request("wallet2").is_allowed());
    }

    #[test]
    fn test_exhausted_with_past_reset_allows() {
        let tracker = tracker();
        let reset = Utc::now().timestamp() - 5;
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, reset.to_string()),
            ]),
        );

        assert!(tracker.can_make_request("wallet1").is_allowed());
    }

    #[test]
    fn test_retry_after_takes_precedence_over_reset() {
        let tracker = tracker();
        let reset = Utc::now().timestamp() + 120;
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, reset.to_string()),
                (HEADER_RETRY_AFTER, "7".to_string()),
            ]),
        );

        match tracker.can_make_request("wallet1") {
            RateDecision::Blocked { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(7));
            }
            other => panic!("expected server block, got {:?}", other),
        }
    }

    #[test]
    fn test_extreme_header_values_block_without_panicking() {
        let tracker = tracker();
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, i64::MAX.to_string()),
                (HEADER_RETRY_AFTER, u64::MAX.to_string()),
            ]),
        );

        match tracker.can_make_request("wallet1") {
            RateDecision::Blocked { retry_after, scope } => {
                assert_eq!(scope, RateLimitScope::Server);
                // Absurd values saturate into a very long wait, never zero.
                assert!(retry_after >= Duration::from_secs(u32::MAX as u64));
            }
            other => panic!("expected server block, got {:?}", other),
        }
    }

    #[test]
    fn test_next_response_overwrites_exhausted_state() {
        let tracker = tracker();
        let reset = Utc::now().timestamp() + 60;
        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, reset.to_string()),
            ]),
        );
        assert!(!tracker.can_make_request("wallet1").is_allowed());

        tracker.record_response(
            "wallet1",
            &headers(&[
                (HEADER_REMAINING, "50".to_string()),
                (HEADER_RESET, reset.to_string()),
            ]),
        );
        assert!(tracker.can_make_request("wallet1").is_allowed());
    }

    #[test]
    fn test_global_cooldown_blocks_every_identity() {
        let tracker = tracker();
        tracker.record_rate_limited(Some(Duration::from_secs(10)));

        for identity in ["wallet1", "wallet2"] {
            match tracker.can_make_request(identity) {
                RateDecision::Blocked { retry_after, scope } => {
                    assert_eq!(scope, RateLimitScope::Server);
                    assert!(retry_after <= Duration::from_secs(10));
                    assert!(retry_after > Duration::from_secs(8));
                }
                other => panic!("expected global block, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_global_cooldown_defaults_when_unspecified() {
        let tracker = tracker();
        tracker.record_rate_limited(None);

        match tracker.can_make_request("wallet1") {
            RateDecision::Blocked { retry_after, .. } => {
                // Default cooldown is 30 s.
                assert!(retry_after > Duration::from_secs(28));
                assert!(retry_after <= Duration::from_secs(30));
            }
            other => panic!("expected global block, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_global_cooldown_clears() {
        let tracker = tracker();
        tracker.record_rate_limited(Some(Duration::ZERO));

        assert!(tracker.can_make_request("wallet1").is_allowed());
    }
}
