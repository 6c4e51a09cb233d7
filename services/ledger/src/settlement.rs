//! Settlement failure listener.
//!
//! Failure reports arrive out-of-band, pushed over a channel rather than as
//! the response to the bet submission. The listener maps each report back to
//! its pending bet by transaction id and reverts the stake through the same
//! guard the direct flow holds, so a report racing a late callback still
//! settles exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::types::Lamports;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::{Notice, NotificationSink};
use crate::pending::PendingBets;

/// One pushed settlement-failure report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub transaction_id: String,
    /// Wallet the failure belongs to. Reports for other identities sharing
    /// the transport are discarded.
    pub subject_address: String,
    pub bet_amount: Lamports,
    pub error_message: String,
    /// True when no retry will occur upstream.
    pub is_permanent: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct FailureListener {
    pending: PendingBets,
    notices: Arc<dyn NotificationSink>,
    /// Active identity; reports addressed elsewhere are ignored.
    owner: String,
}

impl FailureListener {
    pub fn new(pending: PendingBets, notices: Arc<dyn NotificationSink>, owner: String) -> Self {
        Self {
            pending,
            notices,
            owner,
        }
    }

    /// Process one report. Returns whether a reversal was applied.
    pub fn handle(&self, failure: &SettlementFailure) -> bool {
        if failure.subject_address != self.owner {
            debug!(
                tx_id = %failure.transaction_id,
                subject = %failure.subject_address,
                "failure report for another identity, ignoring"
            );
            return false;
        }

        let Some(entry) = self.pending.get_by_tx_id(&failure.transaction_id) else {
            // Normal race: the bet already resolved through the direct flow,
            // or the orphan sweep got there first. Not user-surfaced.
            warn!(
                tx_id = %failure.transaction_id,
                "failure report for unknown transaction, ignoring"
            );
            metrics::counter!("ledger_failures_unmatched_total").increment(1);
            return false;
        };

        let reverted = entry.guard.revert();
        if !reverted {
            debug!(
                tx_id = %failure.transaction_id,
                bet_id = %entry.guard.bet_id(),
                "failure report for already-settled bet"
            );
        } else {
            info!(
                tx_id = %failure.transaction_id,
                bet_id = %entry.guard.bet_id(),
                amount = %entry.amount,
                permanent = failure.is_permanent,
                "settlement failed, stake returned"
            );
            metrics::counter!(
                "ledger_settlement_failures_total",
                "permanent" => if failure.is_permanent { "true" } else { "false" }
            )
            .increment(1);
            self.notices.notify(Notice::SettlementFailed {
                message: failure.error_message.clone(),
                amount: entry.amount,
                permanent: failure.is_permanent,
            });
        }

        self.pending.remove(&entry.session_key);
        reverted
    }
}

/// Listener loop: one report at a time until the channel closes or the
/// engine shuts down.
pub(crate) async fn listen_task(
    listener: FailureListener,
    mut rx: mpsc::Receiver<SettlementFailure>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("settlement failure listener stopped");
                break;
            }
            report = rx.recv() => {
                match report {
                    Some(failure) => {
                        listener.handle(&failure);
                    }
                    None => {
                        debug!("settlement failure channel closed");
                        break;
                    }
                }
            }
        }
    }
}
