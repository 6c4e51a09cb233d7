/// Shared constants for the vault ledger engine
///
/// This module centralizes all magic numbers and timing constants so the
/// engine, its background tasks, and the tests agree on a single set of
/// values.

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Reconciliation drift threshold in lamports (0.001 SOL)
///
/// Rationale: differences below this are fee dust and rounding noise, not
/// missed settlements. Correcting on every sub-threshold wobble would make
/// the displayed balance flicker.
pub const DRIFT_THRESHOLD_LAMPORTS: u64 = 1_000_000;

/// Main reconciliation interval (10 seconds)
///
/// Rationale: fast enough to catch deposits and missed settlements within a
/// human attention span, slow enough to stay well under RPC rate limits.
pub const RECONCILE_INTERVAL_SECS: u64 = 10;

/// Fast-path reconciliation poll interval (2 seconds)
///
/// Rationale: the consumable reconcile-now flag is checked on this cadence
/// so an on-demand request (set right after a bet resolves) shortens the
/// correction latency without a second reconciliation code path.
pub const RECONCILE_FAST_POLL_SECS: u64 = 2;

/// Settlement grace period (3 seconds)
///
/// Rationale: immediately after a local resolution the chain is known to be
/// stale; reconciling inside this window would "correct" the balance right
/// back to its pre-settlement value.
pub const SETTLEMENT_GRACE_MS: u64 = 3_000;

/// Global click debounce between any two bet submissions (300 ms)
///
/// Rationale: absorbs double-clicks and key repeat without being felt by a
/// deliberate player.
pub const CLICK_DEBOUNCE_MS: u64 = 300;

/// Per-action cooldown between bets on the same game action (1.5 seconds)
///
/// Rationale: roughly the shortest round a game animation allows; anything
/// faster is automation or a stuck input.
pub const ACTION_COOLDOWN_MS: u64 = 1_500;

/// Sliding rate-limit window (60 seconds)
pub const BET_WINDOW_SECS: u64 = 60;

/// Maximum bets inside one sliding window (20)
///
/// Rationale: caps client-side submission floods ahead of any server-side
/// limit, so a runaway loop never reaches the network.
pub const MAX_BETS_PER_WINDOW: usize = 20;

/// Bounded size of the completed-bet replay history (100)
///
/// Rationale: large enough to cover every bet id a settlement callback could
/// still retry against, small enough to keep the guard O(window).
pub const REPLAY_HISTORY_LIMIT: usize = 100;

/// Maximum age of replay-guard entries before the sweep drops them (5 minutes)
///
/// Rationale: bounds memory and keeps a crashed client from being locked out
/// of a bet id forever.
pub const REPLAY_MAX_AGE_SECS: u64 = 300;

/// Replay-guard sweep interval (60 seconds)
pub const REPLAY_SWEEP_INTERVAL_SECS: u64 = 60;

/// Maximum age of a pending bet before it is treated as orphaned (5 minutes)
///
/// Rationale: a settlement outcome that has not arrived after five minutes
/// never will; the entry is discarded and reconciliation converges the
/// balance.
pub const PENDING_MAX_AGE_SECS: u64 = 300;

/// Pending-bet sweep interval (60 seconds)
pub const PENDING_SWEEP_INTERVAL_SECS: u64 = 60;

/// Session inactivity timeout (10 minutes)
///
/// Rationale: an unattended connected wallet is a risk on a shared machine;
/// ten minutes matches the vault allowance horizon.
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 600;

/// Lead time before the timeout at which the expiry warning fires (60 seconds)
pub const SESSION_WARNING_LEAD_SECS: u64 = 60;

/// Throttle between applied activity resets (5 seconds)
///
/// Rationale: mouse movement fires continuously; re-arming the session
/// timers more than once per interval is pure churn.
pub const ACTIVITY_THROTTLE_MS: u64 = 5_000;

/// Default global cooldown after a rate-limited response (30 seconds)
///
/// Rationale: applied when the server says 429 without a Retry-After header;
/// conservative enough that the next attempt is unlikely to be refused again.
pub const GLOBAL_COOLDOWN_SECS: u64 = 30;
