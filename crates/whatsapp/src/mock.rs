//! A provider that is always ready and only logs what it would send.
//!
//! Useful for exercising the HTTP surface without pairing a real device.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {async_trait::async_trait, tracing::info};

use crate::{
    error::ProviderError,
    phone::CHAT_ID_SUFFIX,
    provider::{EventSink, ProviderSession, SentMessage, SessionEvent, SessionProvider},
};

#[derive(Debug, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(
        &self,
        _data_dir: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        info!(generation = events.generation(), "mock session started");
        events.emit(SessionEvent::Ready);
        Ok(Arc::new(MockSession::default()))
    }
}

#[derive(Debug, Default)]
struct MockSession {
    sent: AtomicU64,
}

#[async_trait]
impl ProviderSession for MockSession {
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, ProviderError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(chat_id, body, "[mock] message would be sent");
        Ok(SentMessage {
            chat_id: chat_id.to_string(),
            message_id: Some(format!("mock-{n}")),
        })
    }

    async fn lookup(&self, digits: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some(format!("{digits}{CHAT_ID_SUFFIX}")))
    }

    async fn destroy(&self) {}
}
