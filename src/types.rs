// =============================================================================
// Shared types used across the journal backend
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle of a single streaming session to the quote venue.
///
/// ```text
/// Idle -> Connecting -> Authenticating -> Subscribed
///                ^                            |
///                |                     (close / error)
///                |                            v
///        ReconnectPending <-------------- Disconnected
/// ```
///
/// `Closed` is reachable from every state via an explicit caller teardown and
/// is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Subscribed,
    Disconnected,
    ReconnectPending,
    Closed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectionState {
    /// A transport exists (or is being opened) for this state.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Subscribed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::ReconnectPending => write!(f, "ReconnectPending"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_or_opening_states_are_live() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Authenticating.is_live());
        assert!(ConnectionState::Subscribed.is_live());
        assert!(!ConnectionState::Idle.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
        assert!(!ConnectionState::ReconnectPending.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }
}
