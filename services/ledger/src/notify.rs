//! User-visible notifications.
//!
//! The engine never talks to the UI directly; every surfaced event goes
//! through a fire-and-forget sink. Exactly one notice per terminal failure
//! path is the contract the rest of the crate upholds.

use serde::Serialize;
use shared::types::Lamports;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Reserve refused: the bet would overdraw the optimistic balance.
    InsufficientFunds {
        required: Lamports,
        available: Lamports,
    },

    /// A settlement failed and the stake was returned. `permanent` tells the
    /// UI whether a retry will happen upstream.
    SettlementFailed {
        message: String,
        amount: Lamports,
        permanent: bool,
    },

    /// Reconciliation corrected the displayed balance against the chain.
    BalanceCorrected {
        previous: Lamports,
        corrected: Lamports,
    },

    /// The authoritative source says the vault does not exist.
    VaultMissing,

    /// Idle session is about to be disconnected.
    SessionExpiring { remaining_seconds: u64 },

    Info(String),
    Error(String),
}

/// Fire-and-forget sink for user-visible notices. Implementations must not
/// block: `notify` is called from inside ledger critical paths.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default sink: structured log lines only. Used when no UI is attached.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::InsufficientFunds {
                required,
                available,
            } => {
                warn!(%required, %available, "insufficient funds");
            }
            Notice::SettlementFailed {
                message,
                amount,
                permanent,
            } => {
                if *permanent {
                    error!(%amount, permanent, "settlement failed: {}", message);
                } else {
                    warn!(%amount, permanent, "settlement failed: {}", message);
                }
            }
            Notice::BalanceCorrected {
                previous,
                corrected,
            } => {
                info!(%previous, %corrected, "balance corrected from chain");
            }
            Notice::VaultMissing => {
                warn!("vault account not found");
            }
            Notice::SessionExpiring { remaining_seconds } => {
                warn!(remaining_seconds, "session expiring soon");
            }
            Notice::Info(msg) => info!("{}", msg),
            Notice::Error(msg) => error!("{}", msg),
        }
    }
}

/// Sink backed by an unbounded channel. A UI (or a test) holds the receiver.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notice: Notice) {
        // Receiver gone means the UI unmounted; nothing to surface to.
        if self.tx.send(notice).is_err() {
            debug!("notice dropped: no subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify(Notice::VaultMissing);
        sink.notify(Notice::Info("hello".to_string()));

        assert!(matches!(rx.try_recv().unwrap(), Notice::VaultMissing));
        assert!(matches!(rx.try_recv().unwrap(), Notice::Info(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Must not panic.
        sink.notify(Notice::VaultMissing);
    }

    #[test]
    fn test_notice_serializes_with_tag() {
        let notice = Notice::InsufficientFunds {
            required: Lamports::new(100),
            available: Lamports::new(50),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "insufficient_funds");
        assert_eq!(json["required"], 100);
    }
}
