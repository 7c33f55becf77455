use std::time::Duration;

use relay_config::SessionConfig;

/// What caused an automatic recovery (or the logout cleanup) to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTrigger {
    AuthFailure,
    Disconnect,
    ProviderError,
    StartFailure,
    /// Not a recovery: the grace period before wiping a logged-out artifact.
    LogoutGrace,
}

impl RecoveryTrigger {
    /// Whether the recovery must wipe the persisted artifact first.
    pub fn clean_slate(self) -> bool {
        matches!(self, Self::AuthFailure | Self::ProviderError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::Disconnect => "disconnect",
            Self::ProviderError => "provider_error",
            Self::StartFailure => "start_failure",
            Self::LogoutGrace => "logout_grace",
        }
    }
}

/// Bounded automatic recovery with fixed per-trigger delays.
///
/// The attempt ceiling bounds total work, so delays stay flat rather than
/// growing exponentially.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    auth_failure_delay: Duration,
    disconnect_delay: Duration,
    provider_error_delay: Duration,
    start_failure_delay: Duration,
    logout_grace: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            auth_failure_delay: Duration::from_secs(config.auth_failure_delay_secs),
            disconnect_delay: Duration::from_secs(config.disconnect_delay_secs),
            provider_error_delay: Duration::from_secs(config.provider_error_delay_secs),
            start_failure_delay: Duration::from_secs(config.start_failure_delay_secs),
            logout_grace: Duration::from_secs(config.logout_grace_secs),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Another automatic attempt is allowed while `counter < max_attempts`.
    pub fn should_retry(&self, counter: u32) -> bool {
        counter < self.max_attempts
    }

    pub fn next_delay(&self, trigger: RecoveryTrigger) -> Duration {
        match trigger {
            RecoveryTrigger::AuthFailure => self.auth_failure_delay,
            RecoveryTrigger::Disconnect => self.disconnect_delay,
            RecoveryTrigger::ProviderError => self.provider_error_delay,
            RecoveryTrigger::StartFailure => self.start_failure_delay,
            RecoveryTrigger::LogoutGrace => self.logout_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_exclusive() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn zero_ceiling_disables_recovery() {
        let policy = ReconnectPolicy::default().with_max_attempts(0);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn default_delays() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.next_delay(RecoveryTrigger::AuthFailure),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.next_delay(RecoveryTrigger::Disconnect),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.next_delay(RecoveryTrigger::ProviderError),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.next_delay(RecoveryTrigger::LogoutGrace),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn only_auth_and_provider_errors_wipe_credentials() {
        assert!(RecoveryTrigger::AuthFailure.clean_slate());
        assert!(RecoveryTrigger::ProviderError.clean_slate());
        assert!(!RecoveryTrigger::Disconnect.clean_slate());
        assert!(!RecoveryTrigger::StartFailure.clean_slate());
    }
}
