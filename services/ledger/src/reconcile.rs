//! Periodic reconciliation against the authoritative balance.
//!
//! The optimistic balance drifts: settlements land seconds late, deposits
//! happen from other devices, and a missed notification leaves a reservation
//! unaccounted for. Reconciliation fetches the on-chain balance, compares it
//! with what the ledger expects, and when the difference exceeds the drift
//! threshold lets the chain win.
//!
//! Two tasks drive one reconcile function: the main interval (10 s) and a
//! fast-path poll (2 s) that only acts when a resolve has requested an
//! immediate run. Keeping a single function means the two cadences cannot
//! drift apart in behavior.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shared::types::Lamports;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::notify::{Notice, NotificationSink};
use crate::vault::VaultLedger;

/// Result of an authoritative balance read.
#[derive(Debug, Clone, Copy)]
pub struct VaultQuery {
    pub exists: bool,
    pub balance: Lamports,
}

/// Authoritative balance source. The network call itself lives with the
/// embedder; the ledger only sees the outcome.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch_balance(&self, owner: &str) -> anyhow::Result<VaultQuery>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// Network weather: timeout, connection reset, rate limit, 5xx. Keep the
    /// last known state; do not blank the balance because a read failed.
    Transient,
    /// Definitive "no such account". Local vault state must be cleared.
    Fatal,
}

/// Classify a fetch error by message inspection. Only a definitive marker is
/// fatal; anything unrecognized is assumed transient.
pub fn classify_fetch_error(error: &anyhow::Error) -> FetchFailure {
    let msg = error.to_string().to_lowercase();

    let fatal = msg.contains("could not find account")
        || msg.contains("does not exist")
        || msg.contains("accountnotfound")
        || msg.contains("invalid param");

    if fatal {
        FetchFailure::Fatal
    } else {
        FetchFailure::Transient
    }
}

pub struct Reconciler {
    vault: VaultLedger,
    source: Arc<dyn BalanceSource>,
    notices: Arc<dyn NotificationSink>,
    owner: String,
    config: ReconcileConfig,
    last_run: Mutex<Option<Instant>>,
}

impl Reconciler {
    pub fn new(
        vault: VaultLedger,
        source: Arc<dyn BalanceSource>,
        notices: Arc<dyn NotificationSink>,
        owner: String,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            vault,
            source,
            notices,
            owner,
            config,
            last_run: Mutex::new(None),
        }
    }

    /// Run one reconciliation pass. Returns whether a fetch actually
    /// happened: grace-window and interval-spacing skips return false so the
    /// fast path knows to try again later.
    ///
    /// `force` bypasses the once-per-interval spacing but never the grace
    /// window; right after a resolve the chain is known stale and a read
    /// would only produce a false correction.
    pub async fn reconcile(&self, force: bool) -> bool {
        if self.vault.in_grace() {
            debug!(force, "reconcile skipped: settlement grace window");
            return false;
        }

        {
            let mut last_run = self.lock_last_run();
            let now = Instant::now();
            if !force {
                if let Some(last) = *last_run {
                    if now.duration_since(last) < self.config.interval() {
                        debug!("reconcile skipped: ran recently");
                        return false;
                    }
                }
            }
            // Claim the slot before fetching so a forced run also pushes the
            // next interval run out.
            *last_run = Some(now);
        }

        metrics::counter!("ledger_reconcile_runs_total").increment(1);

        match self.source.fetch_balance(&self.owner).await {
            Ok(query) if query.exists => {
                if let Some((previous, corrected)) = self
                    .vault
                    .correct_from_chain(query.balance, self.config.drift_threshold_lamports)
                {
                    metrics::counter!("ledger_balance_corrections_total").increment(1);
                    self.notices.notify(Notice::BalanceCorrected {
                        previous,
                        corrected,
                    });
                }
            }
            Ok(_) => {
                info!(owner = %self.owner, "vault does not exist");
                self.clear_missing_vault();
            }
            Err(e) => match classify_fetch_error(&e) {
                FetchFailure::Transient => {
                    warn!(error = %e, "balance fetch failed; keeping last known state");
                    metrics::counter!("ledger_reconcile_transient_errors_total").increment(1);
                }
                FetchFailure::Fatal => {
                    warn!(error = %e, "balance fetch failed fatally");
                    self.clear_missing_vault();
                }
            },
        }

        true
    }

    fn clear_missing_vault(&self) {
        // Notice only on the present -> missing transition, not every poll.
        if self.vault.clear_vault_state() {
            metrics::counter!("ledger_vault_missing_total").increment(1);
            self.notices.notify(Notice::VaultMissing);
        }
    }

    fn lock_last_run(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Main reconciliation cadence.
pub(crate) async fn interval_task(
    reconciler: Arc<Reconciler>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconcile interval task stopped");
                break;
            }
            _ = ticker.tick() => {
                reconciler.reconcile(false).await;
            }
        }
    }
}

/// Fast path: polls the one-shot request flag and forces a run. A run
/// blocked by the grace window re-arms the flag so the next poll retries;
/// that is what shortens correction latency after a resolve without ever
/// reading a stale balance.
pub(crate) async fn fast_path_task(
    reconciler: Arc<Reconciler>,
    vault: VaultLedger,
    poll: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconcile fast-path task stopped");
                break;
            }
            _ = ticker.tick() => {
                if vault.take_reconcile_request() && !reconciler.reconcile(true).await {
                    vault.request_reconcile();
                }
            }
        }
    }
}
