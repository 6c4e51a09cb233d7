use std::env;
use std::time::Duration;

use serde::Deserialize;
use shared::constants::*;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub reconcile: ReconcileConfig,
    pub limits: LimitsConfig,
    pub session: SessionConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub interval_seconds: u64,
    pub fast_poll_seconds: u64,
    pub grace_ms: u64,
    pub drift_threshold_lamports: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub click_debounce_ms: u64,
    pub action_cooldown_ms: u64,
    pub bet_window_seconds: u64,
    pub max_bets_per_window: usize,
    pub replay_history_limit: usize,
    pub replay_max_age_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub pending_max_age_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub idle_timeout_seconds: u64,
    pub warning_lead_seconds: u64,
    pub activity_throttle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub default_cooldown_seconds: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            reconcile: ReconcileConfig {
                interval_seconds: env::var("LEDGER_RECONCILE_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| RECONCILE_INTERVAL_SECS.to_string())
                    .parse()?,
                fast_poll_seconds: env::var("LEDGER_RECONCILE_FAST_POLL_SECONDS")
                    .unwrap_or_else(|_| RECONCILE_FAST_POLL_SECS.to_string())
                    .parse()?,
                grace_ms: env::var("LEDGER_SETTLEMENT_GRACE_MS")
                    .unwrap_or_else(|_| SETTLEMENT_GRACE_MS.to_string())
                    .parse()?,
                drift_threshold_lamports: env::var("LEDGER_DRIFT_THRESHOLD_LAMPORTS")
                    .unwrap_or_else(|_| DRIFT_THRESHOLD_LAMPORTS.to_string())
                    .parse()?,
            },
            limits: LimitsConfig {
                click_debounce_ms: env::var("LEDGER_CLICK_DEBOUNCE_MS")
                    .unwrap_or_else(|_| CLICK_DEBOUNCE_MS.to_string())
                    .parse()?,
                action_cooldown_ms: env::var("LEDGER_ACTION_COOLDOWN_MS")
                    .unwrap_or_else(|_| ACTION_COOLDOWN_MS.to_string())
                    .parse()?,
                bet_window_seconds: env::var("LEDGER_BET_WINDOW_SECONDS")
                    .unwrap_or_else(|_| BET_WINDOW_SECS.to_string())
                    .parse()?,
                max_bets_per_window: env::var("LEDGER_MAX_BETS_PER_WINDOW")
                    .unwrap_or_else(|_| MAX_BETS_PER_WINDOW.to_string())
                    .parse()?,
                replay_history_limit: env::var("LEDGER_REPLAY_HISTORY_LIMIT")
                    .unwrap_or_else(|_| REPLAY_HISTORY_LIMIT.to_string())
                    .parse()?,
                replay_max_age_seconds: env::var("LEDGER_REPLAY_MAX_AGE_SECONDS")
                    .unwrap_or_else(|_| REPLAY_MAX_AGE_SECS.to_string())
                    .parse()?,
                sweep_interval_seconds: env::var("LEDGER_SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| REPLAY_SWEEP_INTERVAL_SECS.to_string())
                    .parse()?,
                pending_max_age_seconds: env::var("LEDGER_PENDING_MAX_AGE_SECONDS")
                    .unwrap_or_else(|_| PENDING_MAX_AGE_SECS.to_string())
                    .parse()?,
            },
            session: SessionConfig {
                idle_timeout_seconds: env::var("LEDGER_SESSION_IDLE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| SESSION_IDLE_TIMEOUT_SECS.to_string())
                    .parse()?,
                warning_lead_seconds: env::var("LEDGER_SESSION_WARNING_LEAD_SECONDS")
                    .unwrap_or_else(|_| SESSION_WARNING_LEAD_SECS.to_string())
                    .parse()?,
                activity_throttle_ms: env::var("LEDGER_ACTIVITY_THROTTLE_MS")
                    .unwrap_or_else(|_| ACTIVITY_THROTTLE_MS.to_string())
                    .parse()?,
            },
            tracker: TrackerConfig {
                default_cooldown_seconds: env::var("LEDGER_GLOBAL_COOLDOWN_SECONDS")
                    .unwrap_or_else(|_| GLOBAL_COOLDOWN_SECS.to_string())
                    .parse()?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reconcile: ReconcileConfig {
                interval_seconds: RECONCILE_INTERVAL_SECS,
                fast_poll_seconds: RECONCILE_FAST_POLL_SECS,
                grace_ms: SETTLEMENT_GRACE_MS,
                drift_threshold_lamports: DRIFT_THRESHOLD_LAMPORTS,
            },
            limits: LimitsConfig {
                click_debounce_ms: CLICK_DEBOUNCE_MS,
                action_cooldown_ms: ACTION_COOLDOWN_MS,
                bet_window_seconds: BET_WINDOW_SECS,
                max_bets_per_window: MAX_BETS_PER_WINDOW,
                replay_history_limit: REPLAY_HISTORY_LIMIT,
                replay_max_age_seconds: REPLAY_MAX_AGE_SECS,
                sweep_interval_seconds: REPLAY_SWEEP_INTERVAL_SECS,
                pending_max_age_seconds: PENDING_MAX_AGE_SECS,
            },
            session: SessionConfig {
                idle_timeout_seconds: SESSION_IDLE_TIMEOUT_SECS,
                warning_lead_seconds: SESSION_WARNING_LEAD_SECS,
                activity_throttle_ms: ACTIVITY_THROTTLE_MS,
            },
            tracker: TrackerConfig {
                default_cooldown_seconds: GLOBAL_COOLDOWN_SECS,
            },
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn fast_poll(&self) -> Duration {
        Duration::from_secs(self.fast_poll_seconds)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl LimitsConfig {
    pub fn click_debounce(&self) -> Duration {
        Duration::from_millis(self.click_debounce_ms)
    }

    pub fn action_cooldown(&self) -> Duration {
        Duration::from_millis(self.action_cooldown_ms)
    }

    pub fn bet_window(&self) -> Duration {
        Duration::from_secs(self.bet_window_seconds)
    }

    pub fn replay_max_age(&self) -> Duration {
        Duration::from_secs(self.replay_max_age_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn pending_max_age(&self) -> Duration {
        Duration::from_secs(self.pending_max_age_seconds)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::from_secs(self.warning_lead_seconds)
    }

    pub fn activity_throttle(&self) -> Duration {
        Duration::from_millis(self.activity_throttle_ms)
    }
}

impl TrackerConfig {
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_seconds)
    }
}
