use std::time::Duration;

/// Failure reported by a session provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to start session: {0}")]
    Start(String),
    /// Error detail reported by the automation engine itself.
    #[error("{0}")]
    Engine(String),
    #[error("session channel closed")]
    ChannelClosed,
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::ChannelClosed | Self::Timeout(_) => FailureClass::Transient,
            Self::Start(detail) | Self::Engine(detail) => classify(detail),
        }
    }
}

/// How a provider failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Likely resolved by retrying or recreating the session.
    Transient,
    /// The recipient does not exist on the network. Retrying cannot help.
    PermanentRecipient,
    Unclassified,
}

/// Signatures of a crashed execution context, a closed automation target or
/// a dropped protocol channel.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "execution context was destroyed",
    "execution context destroyed",
    "target closed",
    "protocol error",
    "session closed",
    "connection closed",
    "browser has disconnected",
    "socket hang up",
];

const RECIPIENT_SIGNATURES: &[&str] = &[
    "not registered",
    "chat not found",
    "invalid wid",
    "no lid for user",
];

/// Classify a provider error message by known substrings (case-insensitive).
pub fn classify(detail: &str) -> FailureClass {
    let detail = detail.to_ascii_lowercase();
    if RECIPIENT_SIGNATURES.iter().any(|s| detail.contains(s)) {
        FailureClass::PermanentRecipient
    } else if TRANSIENT_SIGNATURES.iter().any(|s| detail.contains(s)) {
        FailureClass::Transient
    } else {
        FailureClass::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_crashed_context_as_transient() {
        assert_eq!(
            classify("Evaluation failed: Execution context was destroyed, most likely because of a navigation"),
            FailureClass::Transient
        );
        assert_eq!(
            classify("Protocol error (Runtime.callFunctionOn): Target closed."),
            FailureClass::Transient
        );
    }

    #[test]
    fn classifies_unknown_recipient_as_permanent() {
        assert_eq!(
            classify("Phone number is not registered"),
            FailureClass::PermanentRecipient
        );
        assert_eq!(classify("Chat not found"), FailureClass::PermanentRecipient);
    }

    #[test]
    fn unknown_text_is_unclassified() {
        assert_eq!(classify("rate limit exceeded"), FailureClass::Unclassified);
    }

    #[test]
    fn transport_failures_are_transient() {
        assert_eq!(ProviderError::ChannelClosed.class(), FailureClass::Transient);
        assert_eq!(
            ProviderError::Timeout(Duration::from_secs(1)).class(),
            FailureClass::Transient
        );
        assert_eq!(
            ProviderError::Engine("boom".into()).class(),
            FailureClass::Unclassified
        );
    }
}
