//! Engine composition.
//!
//! `LedgerEngine` wires the vault, the pending directory, every
//! pre-submission gate, and the background tasks into one context object.
//! The embedder calls `place_bet`, reports outcomes through the ticket, and
//! feeds failure reports into the channel handed to `start`. Everything
//! spawned here is cancelled and joined by `shutdown`, so a remount never
//! leaks a timer.

use std::sync::Arc;

use shared::types::{BetId, Lamports};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::errors::{LedgerError, Result};
use crate::guard::BetGuard;
use crate::limits::rate::RateDecision;
use crate::limits::{BetRateLimiter, RateLimitTracker, SessionGuard, TransactionGuard};
use crate::notify::NotificationSink;
use crate::pending::PendingBets;
use crate::reconcile::{BalanceSource, Reconciler};
use crate::settlement::{FailureListener, SettlementFailure};
use crate::vault::{VaultLedger, VaultSnapshot};
use crate::{pending, reconcile, settlement};

#[derive(Debug, Clone)]
pub struct PlaceBetRequest {
    pub bet_id: BetId,
    /// Game-session key the pending directory files the bet under.
    pub session_key: String,
    /// Game action for per-action rate limiting, e.g. "coinflip".
    pub action: String,
    pub amount: Lamports,
    pub skip_balance_check: bool,
}

/// Receipt for an accepted bet. The embedder settles through it exactly once.
pub struct BetTicket {
    bet_id: BetId,
    session_key: String,
    guard: Arc<BetGuard>,
}

impl BetTicket {
    pub fn bet_id(&self) -> &BetId {
        &self.bet_id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

pub struct LedgerEngine {
    vault: VaultLedger,
    pending: PendingBets,
    limiter: BetRateLimiter,
    replay: TransactionGuard,
    tracker: RateLimitTracker,
    session: SessionGuard,
    notices: Arc<dyn NotificationSink>,
    owner: String,
    config: Config,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LedgerEngine {
    pub fn new(config: Config, owner: String, notices: Arc<dyn NotificationSink>) -> Self {
        let vault = VaultLedger::new(config.reconcile.grace(), Arc::clone(&notices));
        Self {
            vault,
            pending: PendingBets::new(),
            limiter: BetRateLimiter::new(config.limits.clone()),
            replay: TransactionGuard::new(config.limits.replay_history_limit),
            tracker: RateLimitTracker::new(config.tracker.clone()),
            session: SessionGuard::new(config.session.clone()),
            notices,
            owner,
            config,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Gate and reserve one bet. The checks run in fixed order — limiter,
    /// server-advertised limits, replay, funds — and a block at any layer
    /// means nothing downstream runs and no network call is ever made.
    #[instrument(skip(self, request), fields(bet_id = %request.bet_id, amount = %request.amount))]
    pub fn place_bet(&self, request: PlaceBetRequest) -> Result<BetTicket> {
        if let RateDecision::Blocked { retry_after, scope } =
            self.limiter.can_place_bet(&request.action)
        {
            return Err(LedgerError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
                scope,
            });
        }
        // Every allowed attempt advances the windows, whatever happens at the
        // later gates. A refused reserve must still be debounced, or rapid
        // clicks at zero balance would hit the vault on every click.
        self.limiter.record_bet(&request.action);

        if let RateDecision::Blocked { retry_after, scope } =
            self.tracker.can_make_request(&self.owner)
        {
            return Err(LedgerError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
                scope,
            });
        }

        if !self.replay.mark_pending(&request.bet_id) {
            return Err(LedgerError::ReplayRejected {
                bet_id: request.bet_id,
            });
        }

        let guard = match self.vault.reserve(
            request.bet_id.clone(),
            request.amount,
            request.skip_balance_check,
        ) {
            Ok(guard) => guard,
            Err(e) => {
                // Release the replay hold: the same id may retry once funded.
                self.replay.mark_failed(&request.bet_id);
                return Err(e);
            }
        };

        self.pending
            .add(&request.session_key, &self.owner, Arc::clone(&guard));
        self.session.touch();

        info!(session_key = %request.session_key, action = %request.action, "bet placed");
        metrics::counter!("ledger_bets_placed_total").increment(1);

        Ok(BetTicket {
            bet_id: request.bet_id,
            session_key: request.session_key,
            guard,
        })
    }

    /// Attach the on-chain transaction id once the submission returns it.
    /// Required before a failure report can find the bet.
    pub fn attach_transaction(&self, ticket: &BetTicket, tx_id: &str) {
        self.pending.attach_tx(&ticket.session_key, tx_id);
    }

    /// Settle a won bet: the payout lands on top of the already-deducted
    /// stake, and the bet id graduates into the replay history.
    pub fn settle_win(&self, ticket: &BetTicket, payout: Lamports) {
        if !ticket.guard.resolve(true, payout) {
            warn!(bet_id = %ticket.bet_id, "win reported for already-settled bet");
        }
        self.replay.mark_completed(&ticket.bet_id);
        self.pending.remove(&ticket.session_key);
    }

    /// Settle a lost bet: the stake deduction from reserve time stands.
    pub fn settle_loss(&self, ticket: &BetTicket) {
        if !ticket.guard.resolve(false, Lamports::ZERO) {
            warn!(bet_id = %ticket.bet_id, "loss reported for already-settled bet");
        }
        self.replay.mark_completed(&ticket.bet_id);
        self.pending.remove(&ticket.session_key);
    }

    /// Abort a bet whose submission failed before any outcome existed: the
    /// stake returns and the id is freed for a retry.
    pub fn abort_bet(&self, ticket: &BetTicket) {
        ticket.guard.revert();
        self.replay.mark_failed(&ticket.bet_id);
        self.pending.remove(&ticket.session_key);
    }

    /// Spawn the background tasks: both reconciliation cadences, the two
    /// sweeps, the session monitor, and the failure listener.
    pub fn start(
        &mut self,
        source: Arc<dyn BalanceSource>,
        failure_rx: mpsc::Receiver<SettlementFailure>,
        on_timeout: Box<dyn FnOnce() + Send>,
    ) {
        let reconciler = Arc::new(Reconciler::new(
            self.vault.clone(),
            source,
            Arc::clone(&self.notices),
            self.owner.clone(),
            self.config.reconcile.clone(),
        ));

        self.tasks.push(tokio::spawn(reconcile::interval_task(
            Arc::clone(&reconciler),
            self.config.reconcile.interval(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(reconcile::fast_path_task(
            reconciler,
            self.vault.clone(),
            self.config.reconcile.fast_poll(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(pending::sweep_task(
            self.pending.clone(),
            self.config.limits.sweep_interval(),
            self.config.limits.pending_max_age(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(
            crate::limits::replay::sweep_task(
                self.replay.clone(),
                self.config.limits.sweep_interval(),
                self.config.limits.replay_max_age(),
                self.cancel.clone(),
            ),
        ));
        self.tasks.push(tokio::spawn(
            crate::limits::session::monitor_task(
                self.session.clone(),
                Arc::clone(&self.notices),
                on_timeout,
                self.cancel.clone(),
            ),
        ));
        self.tasks.push(tokio::spawn(settlement::listen_task(
            FailureListener::new(
                self.pending.clone(),
                Arc::clone(&self.notices),
                self.owner.clone(),
            ),
            failure_rx,
            self.cancel.clone(),
        )));

        info!(owner = %self.owner, tasks = self.tasks.len(), "ledger engine started");
    }

    /// Cancel and join every background task.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            // A task that panicked already logged through the panic hook;
            // shutdown still completes.
            let _ = task.await;
        }
        info!("ledger engine stopped");
    }

    pub fn vault(&self) -> &VaultLedger {
        &self.vault
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        self.vault.snapshot()
    }

    pub fn request_reconcile(&self) {
        self.vault.request_reconcile();
    }

    /// Record user activity against the session guard.
    pub fn touch(&self) {
        self.session.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RateLimitScope;
    use crate::notify::{ChannelSink, Notice};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> (LedgerEngine, UnboundedReceiver<Notice>) {
        let (sink, rx) = ChannelSink::new();
        let engine = LedgerEngine::new(
            Config::default(),
            "player1".to_string(),
            Arc::new(sink),
        );
        engine.vault().set_balance(Lamports::from_sol(10.0));
        (engine, rx)
    }

    fn request(amount_sol: f64) -> PlaceBetRequest {
        PlaceBetRequest {
            bet_id: BetId::generate(),
            session_key: format!("session-{}", uuid::Uuid::new_v4()),
            action: "coinflip".to_string(),
            amount: Lamports::from_sol(amount_sol),
            skip_balance_check: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_settle_win_flow() {
        let (engine, _rx) = engine();

        let ticket = engine.place_bet(request(1.0)).unwrap();
        assert_eq!(engine.snapshot().balance, Lamports::from_sol(9.0));
        assert_eq!(engine.snapshot().in_flight.count, 1);

        engine.settle_win(&ticket, Lamports::from_sol(2.5));
        assert_eq!(engine.snapshot().balance, Lamports::from_sol(11.5));
        assert_eq!(engine.snapshot().in_flight.count, 0);

        // The id graduated into the replay history; once the rate windows
        // pass, the replay guard is what refuses it.
        tokio::time::advance(Duration::from_secs(2)).await;
        let replayed = engine.place_bet(PlaceBetRequest {
            bet_id: ticket.bet_id().clone(),
            ..request(1.0)
        });
        assert!(matches!(replayed, Err(LedgerError::ReplayRejected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_frees_funds_and_id() {
        let (engine, _rx) = engine();

        let ticket = engine.place_bet(request(2.0)).unwrap();
        let bet_id = ticket.bet_id().clone();
        engine.abort_bet(&ticket);

        assert_eq!(engine.snapshot().balance, Lamports::from_sol(10.0));
        assert_eq!(engine.snapshot().in_flight.count, 0);

        // Same id is claimable again after the cooldown layers pass.
        tokio::time::advance(Duration::from_secs(2)).await;
        let retry = engine.place_bet(PlaceBetRequest {
            bet_id,
            ..request(2.0)
        });
        assert!(retry.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_blocks_before_any_state_change() {
        let (engine, _rx) = engine();

        engine.place_bet(request(1.0)).unwrap();

        // Inside the click debounce: blocked, and neither the balance nor
        // the replay guard saw the second bet.
        let second = request(1.0);
        let blocked = engine.place_bet(second.clone());
        match blocked {
            Err(LedgerError::RateLimited { scope, .. }) => {
                assert_eq!(scope, RateLimitScope::ClickDebounce);
            }
            other => panic!("expected rate limit, got {:?}", other.map(|_| ())),
        }
        assert_eq!(engine.snapshot().balance, Lamports::from_sol(9.0));
        assert_eq!(engine.snapshot().in_flight.count, 1);

        // Once the windows pass, the identical request goes through.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(engine.place_bet(second).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_cooldown_blocks_submission() {
        let (engine, _rx) = engine();
        engine
            .tracker()
            .record_rate_limited(Some(Duration::from_secs(10)));

        let blocked = engine.place_bet(request(1.0));
        assert!(matches!(
            blocked,
            Err(LedgerError::RateLimited {
                scope: RateLimitScope::Server,
                ..
            })
        ));
        assert_eq!(engine.snapshot().in_flight.count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_funds_releases_replay_hold() {
        let (engine, mut rx) = engine();

        let mut req = request(20.0);
        let bet_id = req.bet_id.clone();
        assert!(matches!(
            engine.place_bet(req.clone()),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Notice::InsufficientFunds { .. }
        ));

        // The id was not burned: after a deposit and the rate windows, the
        // same bet goes through.
        engine.vault().set_balance(Lamports::from_sol(25.0));
        tokio::time::advance(Duration::from_secs(2)).await;
        req.bet_id = bet_id;
        assert!(engine.place_bet(req).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_balance_clicks_are_debounced() {
        let (engine, mut rx) = engine();
        engine.vault().set_balance(Lamports::from_sol(0.05));

        // First click reaches the vault and is refused for funds.
        let first = engine.place_bet(PlaceBetRequest {
            action: "coinflip".to_string(),
            ..request(0.1)
        });
        assert!(matches!(first, Err(LedgerError::InsufficientFunds { .. })));

        // The refused attempt still advanced the windows: the follow-up
        // clicks are absorbed by the debounce and never hit the vault.
        for _ in 0..9 {
            let click = engine.place_bet(PlaceBetRequest {
                action: "coinflip".to_string(),
                ..request(0.1)
            });
            assert!(matches!(
                click,
                Err(LedgerError::RateLimited {
                    scope: RateLimitScope::ClickDebounce,
                    ..
                })
            ));
        }

        // Exactly one notice for the whole burst.
        assert!(matches!(
            rx.try_recv().unwrap(),
            Notice::InsufficientFunds { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_bet_id_rejected_while_pending() {
        let (engine, _rx) = engine();

        let req = request(1.0);
        engine.place_bet(req.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let duplicate = engine.place_bet(req);
        assert!(matches!(
            duplicate,
            Err(LedgerError::ReplayRejected { .. })
        ));
        // Only the first reservation exists.
        assert_eq!(engine.snapshot().in_flight.count, 1);
    }
}
