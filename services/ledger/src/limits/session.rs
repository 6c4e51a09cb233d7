//! Inactivity session guard.
//!
//! A connected wallet left unattended gets a warning, then a forced
//! disconnect. User activity arrives as `touch()` calls (throttled, since
//! pointer events fire continuously) and pushes both deadlines out. The
//! monitor re-derives its deadlines from the latest activity on every wakeup
//! instead of juggling cancellable timers.

use std::sync::{Arc, Mutex};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::notify::{Notice, NotificationSink};

#[derive(Debug)]
struct SessionActivity {
    last_activity: Instant,
    /// Last touch that was applied, for throttling.
    last_applied: Option<Instant>,
    /// Whether the expiry warning fired for the current idle stretch.
    warned: bool,
}

/// Cheap-clone handle over the shared activity state.
#[derive(Clone)]
pub struct SessionGuard {
    state: Arc<Mutex<SessionActivity>>,
    config: SessionConfig,
}

impl SessionGuard {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionActivity {
                last_activity: Instant::now(),
                last_applied: None,
                warned: false,
            })),
            config,
        }
    }

    /// Record user activity. Applied at most once per throttle interval;
    /// returns whether this call moved the deadlines.
    pub fn touch(&self) -> bool {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(prev) = state.last_applied {
            if now.duration_since(prev) < self.config.activity_throttle() {
                return false;
            }
        }

        state.last_activity = now;
        state.last_applied = Some(now);
        state.warned = false;
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionActivity> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Wakeup {
    /// Idle deadline reached; disconnect and stop.
    TimedOut,
    /// Sleep until this instant, optionally emitting the expiry warning
    /// first (with the time left until disconnect).
    Sleep(Instant, Option<std::time::Duration>),
}

/// Monitor loop: one warning per idle stretch, one disconnect at the
/// deadline, then done. Cancelled on engine shutdown.
pub(crate) async fn monitor_task(
    guard: SessionGuard,
    notices: Arc<dyn NotificationSink>,
    on_timeout: Box<dyn FnOnce() + Send>,
    cancel: CancellationToken,
) {
    let idle_timeout = guard.config.idle_timeout();
    let warning_lead = guard.config.warning_lead();

    loop {
        let wakeup = {
            let mut state = guard.lock();
            let now = Instant::now();
            let timeout_at = state.last_activity + idle_timeout;
            // A lead longer than the timeout degenerates to warning now.
            let warn_at = timeout_at.checked_sub(warning_lead).unwrap_or(now);

            if now >= timeout_at {
                Wakeup::TimedOut
            } else if !state.warned && now >= warn_at {
                state.warned = true;
                Wakeup::Sleep(timeout_at, Some(timeout_at - now))
            } else if state.warned {
                Wakeup::Sleep(timeout_at, None)
            } else {
                Wakeup::Sleep(warn_at, None)
            }
        };

        let wake_at = match wakeup {
            Wakeup::TimedOut => {
                info!("session idle timeout reached, disconnecting");
                metrics::counter!("ledger_session_timeouts_total").increment(1);
                on_timeout();
                return;
            }
            Wakeup::Sleep(wake_at, warn_remaining) => {
                if let Some(remaining) = warn_remaining {
                    metrics::counter!("ledger_session_warnings_total").increment(1);
                    notices.notify(Notice::SessionExpiring {
                        remaining_seconds: remaining.as_secs(),
                    });
                }
                wake_at
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("session monitor stopped");
                return;
            }
            _ = sleep_until(wake_at) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::ChannelSink;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Monitor {
        guard: SessionGuard,
        rx: UnboundedReceiver<Notice>,
        timed_out: Arc<AtomicBool>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_monitor() -> Monitor {
        let guard = SessionGuard::new(Config::default().session);
        let (sink, rx) = ChannelSink::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let flag = Arc::clone(&timed_out);
        let handle = tokio::spawn(monitor_task(
            guard.clone(),
            Arc::new(sink),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
            cancel.clone(),
        ));

        Monitor {
            guard,
            rx,
            timed_out,
            cancel,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_then_timeout() {
        let mut m = spawn_monitor();
        tokio::task::yield_now().await;

        // Warning fires one lead before the deadline: 600 - 60 = 540 s.
        tokio::time::advance(Duration::from_secs(540)).await;
        tokio::task::yield_now().await;
        match m.rx.try_recv().unwrap() {
            Notice::SessionExpiring { remaining_seconds } => {
                assert_eq!(remaining_seconds, 60);
            }
            other => panic!("unexpected notice: {:?}", other),
        }
        assert!(!m.timed_out.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_secs(60)).await;
        m.handle.await.unwrap();
        assert!(m.timed_out.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_pushes_deadlines_out() {
        let mut m = spawn_monitor();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(500)).await;
        assert!(m.guard.touch());

        // The original warning point passes without a notice.
        tokio::time::advance(Duration::from_secs(100)).await;
        tokio::task::yield_now().await;
        assert!(m.rx.try_recv().is_err());
        assert!(!m.timed_out.load(Ordering::SeqCst));

        // New deadlines run from the touch at t=500: warn at 1040, out at 1100.
        tokio::time::advance(Duration::from_secs(440)).await;
        tokio::task::yield_now().await;
        assert!(matches!(
            m.rx.try_recv().unwrap(),
            Notice::SessionExpiring { .. }
        ));

        tokio::time::advance(Duration::from_secs(60)).await;
        m.handle.await.unwrap();
        assert!(m.timed_out.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_is_throttled() {
        let guard = SessionGuard::new(Config::default().session);

        assert!(guard.touch());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!guard.touch());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(guard.touch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_rearms_after_activity() {
        let mut m = spawn_monitor();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(540)).await;
        tokio::task::yield_now().await;
        assert!(matches!(
            m.rx.try_recv().unwrap(),
            Notice::SessionExpiring { .. }
        ));

        // Activity during the warning window clears the warned state; a new
        // idle stretch earns a fresh warning.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(m.guard.touch());

        tokio::time::advance(Duration::from_secs(540)).await;
        tokio::task::yield_now().await;
        assert!(matches!(
            m.rx.try_recv().unwrap(),
            Notice::SessionExpiring { .. }
        ));
        assert!(!m.timed_out.load(Ordering::SeqCst));

        m.cancel.cancel();
        m.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_monitor_without_disconnect() {
        let m = spawn_monitor();
        tokio::task::yield_now().await;

        m.cancel.cancel();
        m.handle.await.unwrap();
        assert!(!m.timed_out.load(Ordering::SeqCst));

        // Long after the deadline, the callback still never fired.
        tokio::time::advance(Duration::from_secs(700)).await;
        assert!(!m.timed_out.load(Ordering::SeqCst));
    }
}
