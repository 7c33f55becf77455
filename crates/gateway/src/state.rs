use relay_whatsapp::{DispatchError, MessageDispatcher, SessionManager};

use crate::error::ApiError;

/// Shared handler state. Both halves are cheap handles onto the same
/// session actor.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub dispatcher: MessageDispatcher,
}

impl AppState {
    pub fn new(dispatcher: MessageDispatcher) -> Self {
        Self {
            manager: dispatcher.manager().clone(),
            dispatcher,
        }
    }

    /// Attach the current session snapshot to a dispatcher failure.
    pub fn api_error(&self, err: DispatchError) -> ApiError {
        ApiError::Dispatch(err, self.manager.snapshot())
    }
}
