//! Optimistic vault balance.
//!
//! The balance shown to the user is updated the moment a bet is placed,
//! before any network call. Reservation, settlement, and reconciliation
//! write-backs all go through one mutex so every decision and its mutation
//! land in a single critical section. No `.await` is ever taken while the
//! lock is held.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use shared::types::{BetId, Lamports};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{LedgerError, Result};
use crate::guard::BetGuard;
use crate::notify::{Notice, NotificationSink};

/// Aggregate over every reserved-but-unresolved bet.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InFlightExposure {
    pub total: Lamports,
    pub count: u32,
}

/// Read-only view handed to the UI.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VaultSnapshot {
    pub balance: Lamports,
    pub in_flight: InFlightExposure,
    pub unsettled_pnl: i64,
    pub has_vault: bool,
}

#[derive(Debug)]
struct VaultState {
    balance: Lamports,
    in_flight: InFlightExposure,
    /// Net win/loss from locally resolved bets not yet visible on-chain.
    /// Cleared wholesale on drift correction; per-bet attribution is not
    /// possible once settlements land out of order.
    unsettled_pnl: i64,
    has_vault: bool,
    /// Reconciliation skips until this deadline after a local resolve.
    grace_until: Option<Instant>,
    /// One-shot flag consumed by the fast-path reconcile task.
    reconcile_requested: bool,
}

impl VaultState {
    fn new() -> Self {
        Self {
            balance: Lamports::ZERO,
            in_flight: InFlightExposure::default(),
            unsettled_pnl: 0,
            has_vault: false,
            grace_until: None,
            reconcile_requested: false,
        }
    }
}

/// Cheap-clone handle over the shared vault state.
#[derive(Clone)]
pub struct VaultLedger {
    state: Arc<Mutex<VaultState>>,
    notices: Arc<dyn NotificationSink>,
    grace: Duration,
}

impl VaultLedger {
    pub fn new(grace: Duration, notices: Arc<dyn NotificationSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(VaultState::new())),
            notices,
            grace,
        }
    }

    /// Reserve `amount` for a bet: deduct it from the optimistic balance and
    /// record the exposure, all before the caller makes any network call. A
    /// second reserve issued right after this one sees the reduced balance,
    /// which is what prevents over-committal from rapid clicks.
    pub fn reserve(
        &self,
        bet_id: BetId,
        amount: Lamports,
        skip_balance_check: bool,
    ) -> Result<Arc<BetGuard>> {
        let mut state = self.lock();

        if !skip_balance_check && amount > state.balance {
            let available = state.balance;
            drop(state);
            warn!(%bet_id, required = %amount, %available, "reserve refused");
            metrics::counter!("ledger_insufficient_funds_total").increment(1);
            self.notices.notify(Notice::InsufficientFunds {
                required: amount,
                available,
            });
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        state.balance = state.balance.saturating_sub(amount);
        state.in_flight.total = state.in_flight.total.saturating_add(amount);
        state.in_flight.count += 1;
        drop(state);

        debug!(%bet_id, %amount, "reserved");
        metrics::counter!("ledger_bets_reserved_total").increment(1);

        Ok(Arc::new(BetGuard::new(bet_id, amount, self.clone())))
    }

    pub fn get_balance(&self) -> Lamports {
        self.lock().balance
    }

    /// Balance-store write, e.g. from the embedder's initial fetch. Setting a
    /// balance implies the vault exists.
    pub fn set_balance(&self, balance: Lamports) {
        let mut state = self.lock();
        state.balance = balance;
        state.has_vault = true;
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        let state = self.lock();
        VaultSnapshot {
            balance: state.balance,
            in_flight: state.in_flight,
            unsettled_pnl: state.unsettled_pnl,
            has_vault: state.has_vault,
        }
    }

    /// Ask the fast-path task to reconcile on its next poll.
    pub fn request_reconcile(&self) {
        self.lock().reconcile_requested = true;
    }

    /// Wipe all state. Test teardown and remount hygiene.
    pub fn reset(&self) {
        *self.lock() = VaultState::new();
    }

    /// Terminal bookkeeping for a resolved bet. Only reachable through a
    /// guard that has already won its Reserved -> Resolved transition.
    pub(crate) fn settle_resolve(&self, stake: Lamports, won: bool, payout: Lamports) {
        let mut state = self.lock();

        state.in_flight.total = state.in_flight.total.saturating_sub(stake);
        state.in_flight.count = state.in_flight.count.saturating_sub(1);

        // Stake already left the balance at reserve time; a win credits the
        // payout, a loss changes nothing further.
        if won && !payout.is_zero() {
            state.balance = state.balance.saturating_add(payout);
        }

        let delta = if won {
            payout.as_u64() as i64 - stake.as_u64() as i64
        } else {
            -(stake.as_u64() as i64)
        };
        state.unsettled_pnl += delta;

        // The chain will not reflect this outcome for a few seconds; hold
        // reconciliation off so it does not "correct" a stale read.
        state.grace_until = Some(Instant::now() + self.grace);
        state.reconcile_requested = true;
    }

    /// Terminal bookkeeping for a reverted bet: the full stake goes back.
    pub(crate) fn settle_revert(&self, stake: Lamports) {
        let mut state = self.lock();
        state.in_flight.total = state.in_flight.total.saturating_sub(stake);
        state.in_flight.count = state.in_flight.count.saturating_sub(1);
        state.balance = state.balance.saturating_add(stake);
    }

    /// Consume the one-shot fast-path flag.
    pub(crate) fn take_reconcile_request(&self) -> bool {
        let mut state = self.lock();
        std::mem::take(&mut state.reconcile_requested)
    }

    pub(crate) fn in_grace(&self) -> bool {
        self.lock()
            .grace_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Merge an authoritative balance read. Within the drift threshold the
    /// optimistic state stands; beyond it the chain wins: the balance becomes
    /// `max(0, on_chain - in_flight)` and unsettled PnL is cleared, since the
    /// chain now reflects whatever actually settled. Returns the
    /// (previous, corrected) pair when the displayed balance changed.
    pub(crate) fn correct_from_chain(
        &self,
        on_chain: Lamports,
        threshold_lamports: u64,
    ) -> Option<(Lamports, Lamports)> {
        let mut state = self.lock();
        state.has_vault = true;

        let expected = state.balance.as_i128() + state.in_flight.total.as_i128()
            - state.unsettled_pnl as i128;
        let drift = on_chain.as_i128() - expected;

        if drift.unsigned_abs() <= threshold_lamports as u128 {
            return None;
        }

        let previous = state.balance;
        let corrected =
            Lamports::new((on_chain.as_i128() - state.in_flight.total.as_i128()).max(0) as u64);
        state.balance = corrected;
        state.unsettled_pnl = 0;

        if previous == corrected {
            // PnL-only catch-up; nothing the user can see moved.
            debug!(drift, "drift absorbed into unsettled pnl");
            return None;
        }

        info!(%previous, %corrected, drift, "balance corrected from chain");
        Some((previous, corrected))
    }

    /// The authoritative source says there is no vault. Returns true when
    /// this is a transition from a present vault.
    pub(crate) fn clear_vault_state(&self) -> bool {
        let mut state = self.lock();
        let had_vault = state.has_vault;
        state.balance = Lamports::ZERO;
        state.in_flight = InFlightExposure::default();
        state.unsettled_pnl = 0;
        state.has_vault = false;
        had_vault
    }

    pub(crate) fn notices(&self) -> &Arc<dyn NotificationSink> {
        &self.notices
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VaultState> {
        // A poisoned vault mutex means a panic mid-mutation; the state is no
        // longer trustworthy and continuing would corrupt balances.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
