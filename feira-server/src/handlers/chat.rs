use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use shared::models::{
    Conversation, ConversationSummary, Message, SeenResponse, SendMessageRequest,
    StartConversationRequest, TypingRequest,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
};

#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = StartConversationRequest,
    responses(
        (status = 201, description = "Conversation created with its welcome message", body = Conversation),
        (status = 200, description = "Conversation already existed", body = Conversation),
        (status = 401, description = "No valid session", body = ProblemDetails),
        (status = 403, description = "Caller owns the listing", body = ProblemDetails),
        (status = 404, description = "Listing not found", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(name = "http.start_conversation", skip(state, ctx, body))]
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<StartConversationRequest>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let identity = ctx.require_identity()?;
    let started = state
        .chat
        .start_or_get_conversation(identity, body.listing_id)
        .await?;

    let status = if started.created {
        info!(conversation_id = %started.conversation.id, "conversation started");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(started.conversation)))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Caller's inbox, most recent first", body = [ConversationSummary]),
        (status = 401, description = "No valid session", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(name = "http.list_conversations", skip(state, ctx))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let identity = ctx.require_identity()?;
    let summaries = state.chat.list_conversations_for(identity.user_id).await?;
    Ok(Json(summaries))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "Conversation identifier")),
    responses(
        (status = 200, description = "Conversation summary", body = ConversationSummary),
        (status = 403, description = "Caller is not a participant", body = ProblemDetails),
        (status = 404, description = "Conversation not found", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(name = "http.get_conversation", skip(state, ctx))]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationSummary>> {
    let identity = ctx.require_identity()?;
    let summary = state
        .chat
        .get_conversation(identity, conversation_id)
        .await?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = Uuid, Path, description = "Conversation identifier")),
    responses(
        (status = 200, description = "Messages in creation order", body = [Message]),
        (status = 403, description = "Caller is not a participant", body = ProblemDetails),
        (status = 404, description = "Conversation not found", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.list_messages", skip(state, ctx))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let identity = ctx.require_identity()?;
    let messages = state.chat.list_messages(identity, conversation_id).await?;
    Ok(Json(messages))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = Uuid, Path, description = "Conversation identifier")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message persisted", body = Message),
        (status = 400, description = "Blank or oversized content", body = ProblemDetails),
        (status = 403, description = "Caller is not a participant", body = ProblemDetails),
        (status = 404, description = "Conversation not found", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.send_message", skip(state, ctx, body))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let identity = ctx.require_identity()?;
    let message = state
        .chat
        .send_message(identity, conversation_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/seen",
    params(("conversation_id" = Uuid, Path, description = "Conversation identifier")),
    responses(
        (status = 200, description = "Messages flipped to seen", body = SeenResponse),
        (status = 403, description = "Caller is not a participant", body = ProblemDetails),
        (status = 404, description = "Conversation not found", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.mark_seen", skip(state, ctx))]
pub async fn mark_seen(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<SeenResponse>> {
    let identity = ctx.require_identity()?;
    let updated = state.chat.mark_seen(identity, conversation_id).await?;
    Ok(Json(SeenResponse { updated }))
}

#[utoipa::path(
    put,
    path = "/api/conversations/{conversation_id}/typing",
    params(("conversation_id" = Uuid, Path, description = "Conversation identifier")),
    request_body = TypingRequest,
    responses(
        (status = 204, description = "Typing flag updated"),
        (status = 403, description = "Caller is not a participant", body = ProblemDetails),
        (status = 404, description = "Conversation not found", body = ProblemDetails)
    ),
    tag = "Realtime"
)]
#[instrument(name = "http.set_typing", skip(state, ctx, body))]
pub async fn set_typing(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<TypingRequest>,
) -> AppResult<StatusCode> {
    let identity = ctx.require_identity()?;
    state
        .chat
        .set_typing(identity, conversation_id, body.typing)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
