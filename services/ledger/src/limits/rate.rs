//! Client-side bet rate limiter.
//!
//! Three layers, checked in order: a global click debounce that absorbs
//! double-clicks, a per-action cooldown that paces repeat bets on the same
//! game, and a sliding 60-second cap on total submissions. The window is
//! pruned on each check, so no background timer is involved. All three layers
//! sit in front of any server-side limit; a blocked bet never reaches the
//! network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::LimitsConfig;
use crate::errors::RateLimitScope;

/// Outcome of a pre-submission limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Blocked {
        retry_after: Duration,
        scope: RateLimitScope,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug, Default)]
struct RateState {
    /// Last recorded bet on any action.
    last_bet: Option<Instant>,
    /// Last recorded bet per game action.
    per_action: HashMap<String, Instant>,
    /// Timestamps of every bet inside the sliding window, oldest first.
    window: VecDeque<Instant>,
}

/// Cheap-clone handle over the shared limiter state.
#[derive(Clone)]
pub struct BetRateLimiter {
    state: Arc<Mutex<RateState>>,
    config: LimitsConfig,
}

impl BetRateLimiter {
    pub fn new(config: LimitsConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateState::default())),
            config,
        }
    }

    /// Check every layer without consuming anything. Callers that go on to
    /// submit must follow up with [`record_bet`](Self::record_bet), otherwise
    /// the windows never advance.
    pub fn can_place_bet(&self, action: &str) -> RateDecision {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(last) = state.last_bet {
            let elapsed = now.duration_since(last);
            if elapsed < self.config.click_debounce() {
                return RateDecision::Blocked {
                    retry_after: self.config.click_debounce() - elapsed,
                    scope: RateLimitScope::ClickDebounce,
                };
            }
        }

        if let Some(last) = state.per_action.get(action) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.config.action_cooldown() {
                return RateDecision::Blocked {
                    retry_after: self.config.action_cooldown() - elapsed,
                    scope: RateLimitScope::ActionCooldown,
                };
            }
        }

        let window = self.config.bet_window();
        while let Some(front) = state.window.front() {
            if now.duration_since(*front) >= window {
                state.window.pop_front();
            } else {
                break;
            }
        }

        if state.window.len() >= self.config.max_bets_per_window {
            // The cap frees up when the oldest bet ages out of the window.
            let oldest = *state.window.front().unwrap_or(&now);
            return RateDecision::Blocked {
                retry_after: window.saturating_sub(now.duration_since(oldest)),
                scope: RateLimitScope::BetWindow,
            };
        }

        RateDecision::Allowed
    }

    /// Advance all three windows. Call after every allowed attempt.
    pub fn record_bet(&self, action: &str) {
        let mut state = self.lock();
        let now = Instant::now();
        state.last_bet = Some(now);
        state.per_action.insert(action.to_string(), now);
        state.window.push_back(now);
        debug!(action, window_len = state.window.len(), "bet recorded");
    }

    /// Wipe all limiter state. Test teardown and remount hygiene.
    pub fn reset(&self) {
        *self.lock() = RateState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
