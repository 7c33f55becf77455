//! HTTP gateway: a thin JSON surface over the session manager and the
//! message dispatcher.
//!
//! Routes:
//! - `POST /send-message` deliver a text message
//! - `POST /check-number` check whether a number is on the network
//! - `GET  /health`       session state for monitors
//! - `POST /restart`      clean-slate restart of the session

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use {
    error::ApiError,
    server::{build_gateway_app, start_gateway},
    state::AppState,
};
