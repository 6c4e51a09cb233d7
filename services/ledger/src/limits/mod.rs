//! Pre-submission gates.
//!
//! Everything in here runs before a bet is allowed anywhere near the
//! network: client-side pacing, duplicate-id rejection, server-advertised
//! limit tracking, and the inactivity disconnect.

pub mod rate;
pub mod replay;
pub mod session;
pub mod tracker;

pub use rate::{BetRateLimiter, RateDecision};
pub use replay::TransactionGuard;
pub use session::SessionGuard;
pub use tracker::{RateLimitState, RateLimitTracker};
