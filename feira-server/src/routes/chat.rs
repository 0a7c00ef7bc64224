use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::{
    app_state::AppState,
    handlers::{chat, realtime},
};

/// Session-protected chat and realtime routes, relative to `/api`.
pub fn create_router_chat() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/conversations",
            get(chat::list_conversations).post(chat::start_conversation),
        )
        .route("/conversations/{conversation_id}", get(chat::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/conversations/{conversation_id}/seen", post(chat::mark_seen))
        .route("/conversations/{conversation_id}/typing", put(chat::set_typing))
        .route("/realtime", get(realtime::realtime_stream))
        .route(
            "/realtime/connections/{connection_id}",
            delete(realtime::disconnect),
        )
}
