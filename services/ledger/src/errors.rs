use shared::types::{BetId, Lamports};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        required: Lamports,
        available: Lamports,
    },

    #[error("Rate limited ({scope}): retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64, scope: RateLimitScope },

    #[error("Duplicate bet rejected: {bet_id}")]
    ReplayRejected { bet_id: BetId },
}

/// Which layer blocked the request. Client-side limits and server-advertised
/// limits are surfaced differently by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    ClickDebounce,
    ActionCooldown,
    BetWindow,
    Server,
}

impl std::fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RateLimitScope::ClickDebounce => "click debounce",
            RateLimitScope::ActionCooldown => "action cooldown",
            RateLimitScope::BetWindow => "bet window",
            RateLimitScope::Server => "server",
        };
        write!(f, "{}", s)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
