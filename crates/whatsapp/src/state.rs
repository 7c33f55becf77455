use serde::Serialize;

use crate::{error::FailureClass, provider::SessionEvent};

/// Lifecycle state of the single session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    AwaitingPairing,
    Ready,
    Disconnected,
    AuthFailed,
    /// The provider could not be started.
    ErroredTerminating,
}

impl SessionState {
    /// Next state after a provider event, or `None` when the event does not
    /// move the machine from this state.
    ///
    /// `Ready` is only reachable from a session that is still coming up, so
    /// no state is re-entered without passing through `Initializing`.
    pub fn on_event(self, event: &SessionEvent) -> Option<Self> {
        use SessionState::*;

        match (self, event) {
            (Initializing, SessionEvent::PairingCode(_)) => Some(AwaitingPairing),
            (Initializing | AwaitingPairing, SessionEvent::Ready) => Some(Ready),
            (Uninitialized, _) => None,
            (_, SessionEvent::AuthFailed(_)) => Some(AuthFailed),
            (_, SessionEvent::Disconnected(_)) => Some(Disconnected),
            (_, SessionEvent::ProviderError(err)) if err.class() != FailureClass::Transient => {
                Some(Disconnected)
            },
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
            Self::ErroredTerminating => "errored_terminating",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the manager, safe to hand to any caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub initializing: bool,
    pub reconnect_attempts: u32,
    pub max_attempts: u32,
}

impl SessionSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ProviderError, provider::DisconnectReason};

    #[test]
    fn pairing_then_ready() {
        let state = SessionState::Initializing
            .on_event(&SessionEvent::PairingCode("2@abc".into()))
            .unwrap();
        assert_eq!(state, SessionState::AwaitingPairing);
        assert_eq!(
            state.on_event(&SessionEvent::Ready),
            Some(SessionState::Ready)
        );
    }

    #[test]
    fn rotated_code_does_not_transition() {
        assert_eq!(
            SessionState::AwaitingPairing.on_event(&SessionEvent::PairingCode("x".into())),
            None
        );
    }

    #[test]
    fn ready_requires_initialization() {
        assert_eq!(SessionState::Disconnected.on_event(&SessionEvent::Ready), None);
        assert_eq!(SessionState::AuthFailed.on_event(&SessionEvent::Ready), None);
    }

    #[test]
    fn failures_reach_terminal_states_from_anywhere() {
        for state in [
            SessionState::Initializing,
            SessionState::AwaitingPairing,
            SessionState::Ready,
        ] {
            assert_eq!(
                state.on_event(&SessionEvent::AuthFailed("bad".into())),
                Some(SessionState::AuthFailed)
            );
            assert_eq!(
                state.on_event(&SessionEvent::Disconnected(DisconnectReason::LoggedOut)),
                Some(SessionState::Disconnected)
            );
        }
    }

    #[test]
    fn only_non_transient_errors_disconnect() {
        let transient = SessionEvent::ProviderError(ProviderError::ChannelClosed);
        let fatal = SessionEvent::ProviderError(ProviderError::Engine("kaboom".into()));
        assert_eq!(SessionState::Ready.on_event(&transient), None);
        assert_eq!(
            SessionState::Ready.on_event(&fatal),
            Some(SessionState::Disconnected)
        );
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snapshot = SessionSnapshot {
            state: SessionState::AwaitingPairing,
            initializing: true,
            reconnect_attempts: 2,
            max_attempts: 5,
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["state"], "awaiting_pairing");
        assert_eq!(json["reconnectAttempts"], 2);
        assert_eq!(json["maxAttempts"], 5);
    }
}
