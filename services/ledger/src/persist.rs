//! Session persistence boundary.
//!
//! Only the connected flag and the player profile survive a reload; balances,
//! errors, and anything else optimistic is rebuilt from the chain. The
//! boundary is a pure function pair so the persisted shape is explicit
//! instead of hiding in a framework hook.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub address: String,
    pub display_name: Option<String>,
}

/// Full in-memory session state. Transient fields never leave the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    pub player: Option<PlayerProfile>,
    pub vault_initialized: bool,
    pub last_error: Option<String>,
}

/// The subset that is written to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub connected: bool,
    pub player: Option<PlayerProfile>,
}

pub fn to_persisted(state: &SessionState) -> PersistedSession {
    PersistedSession {
        connected: state.connected,
        player: state.player.clone(),
    }
}

/// Rebuild a session from storage. Transient fields come back defaulted:
/// vault presence is re-established by the first reconciliation.
pub fn restore(persisted: PersistedSession) -> SessionState {
    SessionState {
        connected: persisted.connected,
        player: persisted.player,
        vault_initialized: false,
        last_error: None,
    }
}
