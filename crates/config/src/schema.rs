//! Config schema types (gateway, session lifecycle, dispatch, provider).

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub provider: ProviderConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Session lifecycle, recovery and artifact cleanup settings.
///
/// The thresholds are empirical defaults, not protocol constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the paired session artifact.
    /// Defaults to `~/.relay/session`.
    pub data_dir: Option<PathBuf>,
    /// Provider cache directory, wiped by `relay cleanup`.
    /// Defaults to `~/.relay/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Automatic recoveries allowed between two `Ready` transitions.
    pub max_reconnect_attempts: u32,
    pub auth_failure_delay_secs: u64,
    pub disconnect_delay_secs: u64,
    pub provider_error_delay_secs: u64,
    pub start_failure_delay_secs: u64,
    /// Grace period before wiping the artifact after a logout.
    pub logout_grace_secs: u64,
    pub delete_attempts: u32,
    pub delete_retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_dir: None,
            max_reconnect_attempts: 5,
            auth_failure_delay_secs: 10,
            disconnect_delay_secs: 5,
            provider_error_delay_secs: 3,
            start_failure_delay_secs: 5,
            logout_grace_secs: 5,
            delete_attempts: 5,
            delete_retry_delay_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("session"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("cache"))
    }

    pub fn delete_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delete_retry_delay_ms)
    }
}

/// Outbound send retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Total provider attempts per send, including the first.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Upper bound of the random delay added on top of `retry_delay_ms`.
    pub retry_jitter_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            retry_jitter_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// External automation engine spoken to over stdio.
    #[default]
    Sidecar,
    /// Always-ready provider that logs instead of sending.
    Mock,
}

/// Session provider selection and sidecar process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// How long to wait for the engine to answer a single request.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Sidecar,
            command: "node".into(),
            args: vec!["whatsapp-sidecar/index.js".into()],
            env: HashMap::new(),
            request_timeout_secs: 60,
        }
    }
}
