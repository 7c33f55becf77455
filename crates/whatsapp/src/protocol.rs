//! JSON-lines protocol spoken with the automation sidecar over stdio.

use serde::{Deserialize, Serialize};

use crate::{
    error::ProviderError,
    provider::{DisconnectReason, SessionEvent},
};

/// One line written by the sidecar on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Qr {
        code: String,
    },
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Error {
        message: String,
    },
    /// Answer to a [`EngineCommand`] carrying the same `id`.
    Result {
        id: u64,
        ok: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl EngineEvent {
    /// The lifecycle event this line reports, if any. `Result` lines answer
    /// requests and never map to one.
    pub fn into_session_event(self) -> Option<SessionEvent> {
        match self {
            Self::Qr { code } => Some(SessionEvent::PairingCode(code)),
            Self::Ready => Some(SessionEvent::Ready),
            Self::AuthFailure { reason } => Some(SessionEvent::AuthFailed(reason)),
            Self::Disconnected { reason } => {
                Some(SessionEvent::Disconnected(DisconnectReason::parse(&reason)))
            },
            Self::Error { message } => {
                Some(SessionEvent::ProviderError(ProviderError::Engine(message)))
            },
            Self::Result { .. } => None,
        }
    }
}

/// One line written to the sidecar on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    Send {
        id: u64,
        chat_id: String,
        body: String,
    },
    Check {
        id: u64,
        phone: String,
    },
    Shutdown,
}

/// `data` of a successful `check` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LookupData {
    #[serde(default)]
    pub chat_id: Option<String>,
}
