//! Per-bet settlement handle.
//!
//! Every reservation hands back one `BetGuard`. The guard owns the only path
//! to settling that bet, and its tagged state makes the terminal operations
//! idempotent: a retried callback, or the failure listener racing the direct
//! flow, settles at most once.

use std::sync::Mutex;

use shared::types::{BetId, Lamports};
use tracing::{debug, info};

use crate::vault::VaultLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Reserved,
    Resolved,
    Reverted,
}

pub struct BetGuard {
    bet_id: BetId,
    amount: Lamports,
    state: Mutex<GuardState>,
    vault: VaultLedger,
}

impl BetGuard {
    pub(crate) fn new(bet_id: BetId, amount: Lamports, vault: VaultLedger) -> Self {
        Self {
            bet_id,
            amount,
            state: Mutex::new(GuardState::Reserved),
            vault,
        }
    }

    pub fn bet_id(&self) -> &BetId {
        &self.bet_id
    }

    pub fn amount(&self) -> Lamports {
        self.amount
    }

    pub fn state(&self) -> GuardState {
        *self.lock()
    }

    /// Settle with an outcome. The stake stays deducted; a win additionally
    /// credits `payout`. Returns whether the transition applied: false means
    /// this bet already settled and nothing changed.
    ///
    /// Lock order: guard state, then vault state. The vault mutation happens
    /// under the guard lock so a concurrent caller cannot observe the guard
    /// settled while the balance still lacks the payout.
    pub fn resolve(&self, won: bool, payout: Lamports) -> bool {
        let mut state = self.lock();
        if *state != GuardState::Reserved {
            debug!(bet_id = %self.bet_id, state = ?*state, "resolve ignored: already settled");
            return false;
        }
        *state = GuardState::Resolved;
        self.vault.settle_resolve(self.amount, won, payout);
        drop(state);

        info!(bet_id = %self.bet_id, won, payout = %payout, "bet resolved");
        let outcome = if won { "win" } else { "loss" };
        metrics::counter!("ledger_bets_resolved_total", "outcome" => outcome).increment(1);
        true
    }

    /// Undo the reservation entirely: the full stake returns to the balance.
    /// Used when the downstream call failed before any outcome existed.
    /// Returns whether the transition applied: false means this bet already
    /// settled and nothing changed.
    pub fn revert(&self) -> bool {
        let mut state = self.lock();
        if *state != GuardState::Reserved {
            debug!(bet_id = %self.bet_id, state = ?*state, "revert ignored: already settled");
            return false;
        }
        *state = GuardState::Reverted;
        self.vault.settle_revert(self.amount);
        drop(state);

        info!(bet_id = %self.bet_id, amount = %self.amount, "bet reverted");
        metrics::counter!("ledger_bets_reverted_total").increment(1);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for BetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BetGuard")
            .field("bet_id", &self.bet_id)
            .field("amount", &self.amount)
            .field("state", &self.state())
            .finish()
    }
}
