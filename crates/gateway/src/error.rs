use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
};

use relay_whatsapp::{DispatchError, SessionSnapshot};

/// Errors returned by the HTTP handlers, rendered as JSON bodies.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or incomplete request body.
    BadRequest(String),
    /// A dispatcher failure together with the session snapshot taken when it
    /// was reported.
    Dispatch(DispatchError, SessionSnapshot),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(error) => (StatusCode::BAD_REQUEST, json!({ "error": error })),
            Self::Dispatch(err, snapshot) => dispatch_body(err, snapshot),
        };
        (status, Json(body)).into_response()
    }
}

fn dispatch_body(err: DispatchError, snapshot: SessionSnapshot) -> (StatusCode, serde_json::Value) {
    match err {
        DispatchError::InvalidAddress { received, cleaned } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "Invalid phone number format. Expected 10-15 digits including country code.",
                "received": received,
                "cleaned": cleaned,
            }),
        ),
        DispatchError::NotReady(current) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "error": "WhatsApp client not ready. Please try again later.",
                "ready": false,
                "state": current.state,
                "initializing": current.initializing,
                "reconnectAttempts": current.reconnect_attempts,
            }),
        ),
        DispatchError::RecipientNotFound { phone, detail } => (
            StatusCode::NOT_FOUND,
            json!({
                "error": "Phone number is not registered on WhatsApp",
                "phone": phone,
                "details": detail,
            }),
        ),
        DispatchError::DeliveryFailed {
            phone,
            attempts,
            detail,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": "Failed to send message",
                "details": detail,
                "phone": phone,
                "attempts": attempts,
                "clientReady": snapshot.is_ready(),
            }),
        ),
        DispatchError::LookupFailed { phone, detail } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": "Failed to check number",
                "details": detail,
                "phone": phone,
                "clientReady": snapshot.is_ready(),
            }),
        ),
    }
}
