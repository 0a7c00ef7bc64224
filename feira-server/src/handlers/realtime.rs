use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Extension,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, future, stream};
use serde::{Deserialize, Serialize};
use shared::realtime::{ChannelPath, RealtimeEnvelope};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
    middleware::request_context::RequestContext,
    realtime::{ConnectionId, ConnectionStream},
};

/// Most paths a single connection may follow.
const MAX_PATHS: usize = 32;

#[derive(Debug, Deserialize, IntoParams)]
pub struct RealtimeQuery {
    /// Comma-separated fan-out paths, e.g. `conversations,messages/{id}`.
    pub paths: String,
}

/// Payload of the first `connection` event on every stream.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionOpened {
    pub connection_id: String,
    pub user_id: Uuid,
    pub paths: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/realtime",
    params(RealtimeQuery),
    responses(
        (status = 200, description = "Server-sent event stream; the first event is `connection`", content_type = "text/event-stream", body = RealtimeEnvelope),
        (status = 400, description = "Malformed or missing paths", body = ProblemDetails),
        (status = 401, description = "Not allowed to follow one of the paths", body = ProblemDetails)
    ),
    tag = "Realtime"
)]
#[instrument(name = "http.realtime_stream", skip(state, ctx))]
pub async fn realtime_stream(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<RealtimeQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = ctx.require_identity()?;
    let requested = parse_paths(&query.paths)?;

    let mut authorized: Vec<ChannelPath> = Vec::with_capacity(requested.len());
    for path in requested {
        let resolved = state.chat.authorize_subscription(identity, path).await?;
        if !authorized.contains(&resolved) {
            authorized.push(resolved);
        }
    }

    let mut subscriptions = Vec::with_capacity(authorized.len());
    for path in &authorized {
        subscriptions.push(state.hub.subscribe(*path).await.into_stream());
    }

    // Subscriptions are open before presence; from connect until the
    // ConnectionStream guard exists only the error path below awaits.
    let handle = state.presence.connect(identity.user_id).await;
    let opened = ConnectionOpened {
        connection_id: handle.id.to_string(),
        user_id: identity.user_id,
        paths: authorized.iter().map(ToString::to_string).collect(),
    };
    let hello = match Event::default().event("connection").json_data(&opened) {
        Ok(hello) => hello,
        Err(err) => {
            state.presence.disconnect_clean(handle.id).await;
            return Err(ApiError::internal_server_error(format!(
                "encode connection event: {err}"
            )));
        }
    };

    let live = stream::select_all(subscriptions)
        .map(|envelope| Ok::<_, Infallible>(envelope_event(&envelope)));
    let events = stream::once(future::ready(Ok::<_, Infallible>(hello)))
        .chain(live)
        .take_until(handle.token.clone().cancelled_owned())
        .boxed();

    info!(connection_id = %handle.id, paths = opened.paths.len(), "realtime stream opened");

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(
            state.config.realtime.heartbeat_seconds.max(1),
        ))
        .text("keep-alive");

    let events = ConnectionStream::new(events, state.presence.clone(), handle.id);
    Ok(Sse::new(events).keep_alive(keepalive))
}

#[utoipa::path(
    delete,
    path = "/api/realtime/connections/{connection_id}",
    params(("connection_id" = String, Path, description = "Id from the `connection` event")),
    responses(
        (status = 204, description = "Connection closed; presence updated"),
        (status = 400, description = "Malformed connection id", body = ProblemDetails),
        (status = 403, description = "Connection belongs to another user", body = ProblemDetails),
        (status = 404, description = "Connection not open", body = ProblemDetails)
    ),
    tag = "Realtime"
)]
#[instrument(name = "http.disconnect", skip(state, ctx))]
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(connection_id): Path<String>,
) -> AppResult<StatusCode> {
    let identity = ctx.require_identity()?;
    let connection_id: ConnectionId = connection_id
        .parse()
        .map_err(|_| ApiError::invalid_argument("connection id must be a UUID"))?;

    match state.presence.owner(connection_id).await {
        None => return Err(ApiError::not_found("connection is not open")),
        Some(owner) if owner != identity.user_id => {
            return Err(ApiError::forbidden("connection belongs to another user"));
        }
        Some(_) => {}
    }

    state.presence.disconnect_clean(connection_id).await;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_paths(raw: &str) -> AppResult<Vec<ChannelPath>> {
    let paths = raw
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .parse::<ChannelPath>()
                .map_err(|err| ApiError::invalid_argument(err.to_string()))
        })
        .collect::<AppResult<Vec<_>>>()?;

    if paths.is_empty() {
        return Err(ApiError::invalid_argument("at least one path is required"));
    }
    if paths.len() > MAX_PATHS {
        return Err(ApiError::invalid_argument(format!(
            "at most {MAX_PATHS} paths per connection"
        )));
    }
    Ok(paths)
}

fn envelope_event(envelope: &RealtimeEnvelope) -> Event {
    let event = Event::default()
        .event(envelope.event.event_type())
        .id(format!("{}:{}", envelope.path, envelope.sequence));
    match event.json_data(envelope) {
        Ok(event) => event,
        Err(err) => {
            warn!(path = %envelope.path, error = %err, "failed to encode realtime envelope");
            Event::default().comment("encode-error")
        }
    }
}
