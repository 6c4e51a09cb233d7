//! Pending-bet directory.
//!
//! One entry per game session, created at submission time. The settlement
//! failure listener looks entries up by transaction id once the on-chain
//! transaction is known, which is why `tx_id` is attached asynchronously
//! after creation. Each entry shares the bet's guard, so a reversal from
//! here goes through the same idempotency gate as the direct flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::types::Lamports;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::guard::BetGuard;

#[derive(Clone)]
pub struct PendingBet {
    pub session_key: String,
    pub amount: Lamports,
    pub player: String,
    pub tx_id: Option<String>,
    pub created_at: Instant,
    pub guard: Arc<BetGuard>,
}

/// Directory of in-flight bets, keyed by game session.
#[derive(Clone, Default)]
pub struct PendingBets {
    entries: Arc<Mutex<HashMap<String, PendingBet>>>,
}

impl PendingBets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session_key: &str, player: &str, guard: Arc<BetGuard>) {
        let entry = PendingBet {
            session_key: session_key.to_string(),
            amount: guard.amount(),
            player: player.to_string(),
            tx_id: None,
            created_at: Instant::now(),
            guard,
        };

        let replaced = self.lock().insert(session_key.to_string(), entry);
        if let Some(old) = replaced {
            // Should not happen in a well-behaved flow; the old guard stays
            // settleable through whoever still holds it.
            warn!(
                session_key,
                old_bet = %old.guard.bet_id(),
                "pending entry replaced before resolution"
            );
        }
    }

    /// Attach the on-chain transaction id once the submission returns it.
    pub fn attach_tx(&self, session_key: &str, tx_id: &str) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(session_key) {
            Some(entry) => {
                entry.tx_id = Some(tx_id.to_string());
                debug!(session_key, tx_id, "transaction attached to pending bet");
                true
            }
            None => {
                warn!(session_key, tx_id, "no pending bet to attach transaction to");
                false
            }
        }
    }

    /// Linear scan: entry count is the number of in-flight bets, so this
    /// stays tiny.
    pub fn get_by_tx_id(&self, tx_id: &str) -> Option<PendingBet> {
        self.lock()
            .values()
            .find(|entry| entry.tx_id.as_deref() == Some(tx_id))
            .cloned()
    }

    pub fn remove_by_tx_id(&self, tx_id: &str) -> Option<PendingBet> {
        let mut entries = self.lock();
        let key = entries
            .values()
            .find(|entry| entry.tx_id.as_deref() == Some(tx_id))
            .map(|entry| entry.session_key.clone())?;
        entries.remove(&key)
    }

    pub fn remove(&self, session_key: &str) -> Option<PendingBet> {
        self.lock().remove(session_key)
    }

    /// Drop entries older than `max_age`. Orphans are discarded, not
    /// reverted: an entry this stale either settled without us hearing about
    /// it or the notification is never coming, and inventing a refund the
    /// chain never made would corrupt the balance.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        // A clock younger than the horizon cannot hold anything stale.
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at > cutoff);
        let swept = before - entries.len();
        drop(entries);

        if swept > 0 {
            info!(swept, "discarded orphaned pending bets");
            metrics::counter!("ledger_pending_swept_total").increment(swept as u64);
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingBet>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background sweep, cancelled on engine shutdown.
pub(crate) async fn sweep_task(
    pending: PendingBets,
    sweep_interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("pending sweep task stopped");
                break;
            }
            _ = ticker.tick() => {
                pending.sweep_older_than(max_age);
            }
        }
    }
}
