//! Optimistic balance ledger for a Solana casino client.
//!
//! Funds are reserved the instant a bet is placed, ahead of any network
//! call; outcomes arriving out of order, duplicated callbacks, and pushed
//! failure reports all settle through idempotent per-bet guards; a periodic
//! reconciler keeps the optimistic balance honest against the on-chain
//! vault. The crate owns no wire surface — it is the state layer between UI
//! event handlers and the embedder's network calls.

pub mod config;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod limits;
pub mod notify;
pub mod pending;
pub mod persist;
pub mod reconcile;
pub mod settlement;
pub mod vault;

pub use config::Config;
pub use engine::{BetTicket, LedgerEngine, PlaceBetRequest};
pub use errors::{LedgerError, RateLimitScope, Result};
pub use guard::{BetGuard, GuardState};
pub use notify::{ChannelSink, Notice, NotificationSink, TracingSink};
pub use reconcile::{BalanceSource, VaultQuery};
pub use settlement::SettlementFailure;
pub use vault::{InFlightExposure, VaultLedger, VaultSnapshot};
