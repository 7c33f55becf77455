//! WhatsApp session core for the relay gateway.
//!
//! One long-lived paired session is owned by [`SessionManager`], an actor
//! that reacts to provider lifecycle events and schedules bounded recovery.
//! [`MessageDispatcher`] sends through whatever session is currently ready,
//! retrying transient provider failures. How a session actually drives the
//! chat client is hidden behind [`SessionProvider`]; the crate ships a
//! stdio sidecar provider and an always-ready mock.

pub mod dispatch;
pub mod error;
pub mod manager;
pub mod mock;
pub mod pairing;
pub mod phone;
pub mod policy;
pub mod protocol;
pub mod provider;
pub mod sidecar;
pub mod state;
pub mod store;
mod timer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::sync::Arc;

use relay_config::{ProviderConfig, ProviderKind};

pub use {
    dispatch::{Delivery, DispatchError, MessageDispatcher, NumberLookup},
    error::{FailureClass, ProviderError},
    manager::SessionManager,
    mock::MockProvider,
    phone::{InvalidPhone, PhoneNumber},
    policy::{ReconnectPolicy, RecoveryTrigger},
    provider::{
        DisconnectReason, EventEnvelope, EventSink, ProviderSession, SentMessage, SessionEvent,
        SessionProvider,
    },
    sidecar::SidecarProvider,
    state::{SessionSnapshot, SessionState},
    store::{PlatformRemover, RemovalStrategy, SessionStateStore},
};

/// Build the provider selected in config.
pub fn provider_from_config(config: &ProviderConfig) -> Arc<dyn SessionProvider> {
    match config.kind {
        ProviderKind::Sidecar => Arc::new(SidecarProvider::new(config.clone())),
        ProviderKind::Mock => Arc::new(MockProvider::new()),
    }
}
