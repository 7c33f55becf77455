//! The session provider seam.
//!
//! A provider knows how to bring up a paired chat-client session (driving a
//! browser, a protocol library, an external engine...). The core only sees
//! lifecycle events and a handle that can send text and look up numbers.

use std::{path::Path, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::error::ProviderError;

/// Lifecycle events a provider session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fresh pairing code must be scanned by an operator.
    PairingCode(String),
    Ready,
    Disconnected(DisconnectReason),
    AuthFailed(String),
    ProviderError(ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side unlinked this device.
    LoggedOut,
    /// The automated client navigated away from the chat application.
    NavigationAway,
    /// Unrecoverable provider error.
    Fatal,
    Other(String),
}

impl DisconnectReason {
    /// Map a provider-reported reason string onto a known reason.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOGOUT" | "LOGGED_OUT" | "UNPAIRED" | "UNPAIRED_IDLE" => Self::LoggedOut,
            "NAVIGATION" | "NAVIGATION_AWAY" => Self::NavigationAway,
            "FATAL" => Self::Fatal,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Whether the stored pairing is no longer usable and must not be resumed.
    pub fn invalidates_pairing(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::NavigationAway)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("LOGOUT"),
            Self::NavigationAway => f.write_str("NAVIGATION"),
            Self::Fatal => f.write_str("fatal"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// An event tagged with the generation of the session that produced it.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Where a provider session reports its lifecycle events.
///
/// Each session gets its own sink; events from an abandoned generation are
/// discarded by the receiver.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving side is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(EventEnvelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub chat_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Factory for provider sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Short identifier reported by the health endpoint.
    fn name(&self) -> &'static str;

    /// Launch a new session whose persisted artifact lives in `data_dir`.
    ///
    /// Returns once the session is launched. Pairing and readiness are
    /// reported later through `events`.
    async fn start(
        &self,
        data_dir: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn ProviderSession>, ProviderError>;
}

/// A live session created by a [`SessionProvider`].
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, ProviderError>;

    /// Resolve a bare number to a chat id, `None` when it is not on the network.
    async fn lookup(&self, digits: &str) -> Result<Option<String>, ProviderError>;

    /// Tear the session down. Must be safe to call more than once.
    async fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_disconnect_reasons() {
        assert_eq!(DisconnectReason::parse("LOGOUT"), DisconnectReason::LoggedOut);
        assert_eq!(DisconnectReason::parse("navigation"), DisconnectReason::NavigationAway);
        assert_eq!(
            DisconnectReason::parse("CONFLICT"),
            DisconnectReason::Other("CONFLICT".into())
        );
        assert!(DisconnectReason::LoggedOut.invalidates_pairing());
        assert!(!DisconnectReason::Fatal.invalidates_pairing());
    }

    #[test]
    fn sink_tags_events_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(SessionEvent::Ready));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.generation, 7);
        assert_eq!(envelope.event, SessionEvent::Ready);

        drop(rx);
        assert!(!sink.emit(SessionEvent::Ready));
    }
}
