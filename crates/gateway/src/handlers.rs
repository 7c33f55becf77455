use {
    axum::{
        Json,
        extract::{State, rejection::JsonRejection},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use relay_whatsapp::NumberLookup;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub phone: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckNumberRequest {
    pub phone: Option<String>,
}

/// Treat absent, null and blank fields alike.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(error = %rejection, "rejected request body");
        ApiError::BadRequest(rejection.body_text())
    })
}

/// `POST /send-message`
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = body(payload)?;
    let (Some(phone), Some(message)) = (present(req.phone), present(req.message)) else {
        return Err(ApiError::BadRequest("Missing phone or message".into()));
    };

    let delivery = state
        .dispatcher
        .send(&phone, &message)
        .await
        .map_err(|e| state.api_error(e))?;

    let mut response = json!({
        "success": true,
        "message": "Message sent successfully",
        "chatId": delivery.chat_id,
        "phone": delivery.phone,
        "attempts": delivery.attempts,
    });
    if let Some(message_id) = delivery.message_id {
        response["messageId"] = Value::String(message_id);
    }
    Ok(Json(response))
}

/// `POST /check-number`
pub async fn check_number(
    State(state): State<AppState>,
    payload: Result<Json<CheckNumberRequest>, JsonRejection>,
) -> Result<Json<NumberLookup>, ApiError> {
    let Some(phone) = present(body(payload)?.phone) else {
        return Err(ApiError::BadRequest("Missing phone".into()));
    };

    state
        .dispatcher
        .check_number(&phone)
        .await
        .map(Json)
        .map_err(|e| state.api_error(e))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.manager.snapshot();
    Json(json!({
        "status": if snapshot.is_ready() { "ready" } else { "not_ready" },
        "state": snapshot.state,
        "initializing": snapshot.initializing,
        "reconnectAttempts": snapshot.reconnect_attempts,
        "maxAttempts": snapshot.max_attempts,
        "type": state.manager.provider_name(),
    }))
}

/// `POST /restart`: wipe the stored session and start over. Returns before
/// the new session is up.
pub async fn restart(State(state): State<AppState>) -> Json<Value> {
    info!(state = %state.manager.snapshot().state, "restart requested over http");
    state.manager.restart(true);
    Json(json!({
        "message": "Restart initiated with a clean session. Watch the logs for a new pairing code.",
    }))
}
