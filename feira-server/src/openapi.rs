#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::{
    models::{
        Conversation, ConversationSummary, Message, SeenResponse, SendMessageRequest,
        StartConversationRequest, Timestamp, TypingRequest, UserProfile,
    },
    realtime::{
        ConversationEvent, MessageEvent, NotificationEvent, PresenceEvent, RealtimeEnvelope,
        RealtimeEvent, SeenEvent, TypingEvent,
    },
};
use utoipa::OpenApi;

use crate::{handlers::realtime::ConnectionOpened, http::problem::ProblemDetails};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Feira Chat API",
        version = "1.0.0",
        description = "Buyer/seller conversations, messages and realtime fan-out for the Feira marketplace"
    ),
    paths(
        crate::handlers::chat::start_conversation,
        crate::handlers::chat::list_conversations,
        crate::handlers::chat::get_conversation,
        crate::handlers::chat::list_messages,
        crate::handlers::chat::send_message,
        crate::handlers::chat::mark_seen,
        crate::handlers::chat::set_typing,
        crate::handlers::realtime::realtime_stream,
        crate::handlers::realtime::disconnect,
    ),
    components(
        schemas(
            Conversation,
            ConversationSummary,
            Message,
            UserProfile,
            Timestamp,
            StartConversationRequest,
            SendMessageRequest,
            TypingRequest,
            SeenResponse,
            RealtimeEnvelope,
            RealtimeEvent,
            MessageEvent,
            SeenEvent,
            ConversationEvent,
            PresenceEvent,
            TypingEvent,
            NotificationEvent,
            ConnectionOpened,
            ProblemDetails,
        )
    ),
    tags(
        (name = "Conversations", description = "Conversation lifecycle and inbox"),
        (name = "Messages", description = "Message history and delivery"),
        (name = "Realtime", description = "Server-sent events, presence and typing")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_chat_path() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/conversations",
            "/api/conversations/{conversation_id}",
            "/api/conversations/{conversation_id}/messages",
            "/api/conversations/{conversation_id}/seen",
            "/api/conversations/{conversation_id}/typing",
            "/api/realtime",
            "/api/realtime/connections/{connection_id}",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn document_serializes() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("Feira Chat API"));
    }
}
