//! Duplicate-submission guard.
//!
//! Every bet id passes through here exactly once: `mark_pending` claims it,
//! and the claim either graduates into a bounded completed history or is
//! dropped so a legitimate retry can reuse the id. A retried callback or a
//! double-clicked submit that replays a known id is refused before anything
//! downstream runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::types::BetId;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ReplayState {
    /// Bets claimed but not yet terminal.
    pending: HashMap<BetId, Instant>,
    /// Recently completed bets; bounded to the most recent N.
    completed: HashMap<BetId, Instant>,
}

/// Cheap-clone handle over the shared replay state.
#[derive(Clone)]
pub struct TransactionGuard {
    state: Arc<Mutex<ReplayState>>,
    history_limit: usize,
}

impl TransactionGuard {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState::default())),
            history_limit,
        }
    }

    /// Claim a bet id. Returns false when the id is already pending or sits
    /// in the completed history; the caller must treat that as a no-op and
    /// skip the submission entirely.
    pub fn mark_pending(&self, bet_id: &BetId) -> bool {
        let mut state = self.lock();

        if state.pending.contains_key(bet_id) {
            warn!(%bet_id, "replay rejected: bet already pending");
            metrics::counter!("ledger_replays_rejected_total", "reason" => "pending")
                .increment(1);
            return false;
        }
        if state.completed.contains_key(bet_id) {
            warn!(%bet_id, "replay rejected: bet already completed");
            metrics::counter!("ledger_replays_rejected_total", "reason" => "completed")
                .increment(1);
            return false;
        }

        state.pending.insert(bet_id.clone(), Instant::now());
        true
    }

    /// Move a bet into the completed history, trimming the history to the
    /// most recent entries when it overflows.
    pub fn mark_completed(&self, bet_id: &BetId) {
        let mut state = self.lock();

        if state.pending.remove(bet_id).is_none() {
            debug!(%bet_id, "completed bet was not pending");
        }
        state.completed.insert(bet_id.clone(), Instant::now());

        while state.completed.len() > self.history_limit {
            let oldest = state
                .completed
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    state.completed.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Drop a bet from the pending set without recording completion. The same
    /// id may be claimed again, which is what lets a failed submission retry.
    pub fn mark_failed(&self, bet_id: &BetId) {
        let mut state = self.lock();
        if state.pending.remove(bet_id).is_none() {
            debug!(%bet_id, "failed bet was not pending");
        }
    }

    /// Drop entries older than `max_age` from both sets. Bounds memory and
    /// keeps a crashed client from being locked out of its bet ids forever.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        // A clock younger than the horizon cannot hold anything stale.
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        let mut state = self.lock();

        let before = state.pending.len() + state.completed.len();
        state.pending.retain(|_, at| *at > cutoff);
        state.completed.retain(|_, at| *at > cutoff);
        let swept = before - state.pending.len() - state.completed.len();
        drop(state);

        if swept > 0 {
            info!(swept, "swept stale replay-guard entries");
            metrics::counter!("ledger_replay_swept_total").increment(swept as u64);
        }
        swept
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.lock().completed.len()
    }

    /// Wipe all replay state. Test teardown and remount hygiene.
    pub fn reset(&self) {
        *self.lock() = ReplayState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background sweep, cancelled on engine shutdown.
pub(crate) async fn sweep_task(
    guard: TransactionGuard,
    sweep_interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("replay sweep task stopped");
                break;
            }
            _ = ticker.tick() => {
                guard.sweep_older_than(max_age);
            }
        }
    }
}
