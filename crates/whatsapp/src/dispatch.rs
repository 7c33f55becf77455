//! Outbound messages through the current session.

use std::time::Duration;

use {
    rand::Rng,
    relay_config::DispatchConfig,
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    error::{FailureClass, ProviderError},
    manager::SessionManager,
    phone::{InvalidPhone, PhoneNumber},
    state::SessionSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid phone number {received:?} (cleaned {cleaned:?})")]
    InvalidAddress { received: String, cleaned: String },
    #[error("session is not ready ({})", .0.state)]
    NotReady(SessionSnapshot),
    #[error("{phone} is not on the network: {detail}")]
    RecipientNotFound { phone: String, detail: String },
    #[error("delivery to {phone} failed after {attempts} attempt(s): {detail}")]
    DeliveryFailed {
        phone: String,
        attempts: u32,
        detail: String,
    },
    #[error("lookup of {phone} failed: {detail}")]
    LookupFailed { phone: String, detail: String },
}

impl From<InvalidPhone> for DispatchError {
    fn from(e: InvalidPhone) -> Self {
        Self::InvalidAddress {
            received: e.received,
            cleaned: e.cleaned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub phone: String,
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberLookup {
    pub phone: String,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// Sends text through whichever session is `Ready`, retrying transient
/// provider failures and escalating repeated ones to the manager.
#[derive(Clone)]
pub struct MessageDispatcher {
    manager: SessionManager,
    max_attempts: u32,
    retry_delay: Duration,
    retry_jitter: Duration,
}

impl MessageDispatcher {
    pub fn new(manager: SessionManager) -> Self {
        Self::from_config(manager, &DispatchConfig::default())
    }

    pub fn from_config(manager: SessionManager, config: &DispatchConfig) -> Self {
        Self::new_with_retry(
            manager,
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
            Duration::from_millis(config.retry_jitter_ms),
        )
    }

    fn new_with_retry(
        manager: SessionManager,
        max_attempts: u32,
        retry_delay: Duration,
        retry_jitter: Duration,
    ) -> Self {
        Self {
            manager,
            max_attempts: max_attempts.max(1),
            retry_delay,
            retry_jitter,
        }
    }

    /// Override the retry budget. At least one attempt is always made.
    pub fn with_retry(self, max_attempts: u32, retry_delay: Duration, jitter: Duration) -> Self {
        Self::new_with_retry(self.manager, max_attempts, retry_delay, jitter)
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub async fn send(&self, address: &str, body: &str) -> Result<Delivery, DispatchError> {
        let phone = PhoneNumber::parse(address)?;
        let chat_id = phone.chat_id();
        self.ensure_ready()?;

        let mut consecutive_transient = 0u32;
        let mut signalled = false;
        let mut last_detail = String::new();

        for attempt in 1..=self.max_attempts {
            let Some(session) = self.manager.ready_session() else {
                warn!(%phone, attempt, "session left ready state during send");
                return Err(DispatchError::NotReady(self.manager.snapshot()));
            };

            match session.send_text(&chat_id, body).await {
                Ok(sent) => {
                    info!(%phone, attempt, message_id = ?sent.message_id, "message sent");
                    return Ok(Delivery {
                        phone: phone.to_string(),
                        chat_id: sent.chat_id,
                        message_id: sent.message_id,
                        attempts: attempt,
                    });
                },
                Err(e) => {
                    let class = e.class();
                    warn!(
                        %phone,
                        attempt,
                        max_attempts = self.max_attempts,
                        class = ?class,
                        error = %e,
                        "send attempt failed"
                    );
                    last_detail = e.to_string();

                    match class {
                        FailureClass::PermanentRecipient => {
                            return Err(DispatchError::RecipientNotFound {
                                phone: phone.to_string(),
                                detail: last_detail,
                            });
                        },
                        FailureClass::Transient => {
                            consecutive_transient += 1;
                            if consecutive_transient >= 2 && !signalled {
                                signalled = true;
                                self.manager.report_transient(last_detail.clone());
                            }
                        },
                        FailureClass::Unclassified => consecutive_transient = 0,
                    }
                },
            }

            if attempt < self.max_attempts {
                let delay = self.backoff();
                debug!(%phone, attempt, delay_ms = delay.as_millis() as u64, "retrying send");
                tokio::time::sleep(delay).await;
            }
        }

        Err(DispatchError::DeliveryFailed {
            phone: phone.to_string(),
            attempts: self.max_attempts,
            detail: last_detail,
        })
    }

    /// Whether `address` is reachable on the network. A recipient error from
    /// the provider means unregistered, not failure.
    pub async fn check_number(&self, address: &str) -> Result<NumberLookup, DispatchError> {
        let phone = PhoneNumber::parse(address)?;
        let Some(session) = self.manager.ready_session() else {
            return Err(DispatchError::NotReady(self.manager.snapshot()));
        };

        match session.lookup(phone.digits()).await {
            Ok(chat_id) => {
                debug!(%phone, registered = chat_id.is_some(), "number looked up");
                Ok(NumberLookup {
                    phone: phone.to_string(),
                    registered: chat_id.is_some(),
                    chat_id,
                })
            },
            Err(e) => self.lookup_failed(phone, e),
        }
    }

    fn lookup_failed(
        &self,
        phone: PhoneNumber,
        e: ProviderError,
    ) -> Result<NumberLookup, DispatchError> {
        match e.class() {
            FailureClass::PermanentRecipient => Ok(NumberLookup {
                phone: phone.to_string(),
                registered: false,
                chat_id: None,
            }),
            class => {
                warn!(%phone, class = ?class, error = %e, "number lookup failed");
                if class == FailureClass::Transient {
                    self.manager.report_transient(e.to_string());
                }
                Err(DispatchError::LookupFailed {
                    phone: phone.to_string(),
                    detail: e.to_string(),
                })
            },
        }
    }

    fn ensure_ready(&self) -> Result<(), DispatchError> {
        let snapshot = self.manager.snapshot();
        if snapshot.is_ready() {
            Ok(())
        } else {
            Err(DispatchError::NotReady(snapshot))
        }
    }

    fn backoff(&self) -> Duration {
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.retry_delay;
        }
        self.retry_delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}
