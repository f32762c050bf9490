use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary that never includes keys.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "chat-relay is running",
        "config": {
            "upstream_url": state.relay.upstream().chat_url().as_str(),
            "upstream_key_configured": config.upstream.api_key.is_some(),
            "metering_enabled": state.relay.metering().is_enabled(),
            "features": {
                "log_level": config.features.log_level,
            }
        }
    }))
}
