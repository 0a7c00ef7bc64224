use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{Span, debug};

use crate::{
    app_state::AppState,
    auth::session::{extract_session_token, token_fingerprint},
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::ChatError,
};

/// Resolves the session token to an [`Identity`](crate::auth::Identity) and
/// stores it on the request context. Requests without a live session get `401`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let token = extract_session_token(req.headers(), &state.config.session.session_cookie_name)
        .ok_or_else(|| ApiError::unauthenticated("session token missing"))?;

    let identity = match state.chat.authenticate(&token).await {
        Ok(identity) => identity,
        Err(ChatError::Unauthenticated) => {
            debug!(token = %token_fingerprint(&token), "session rejected");
            return Err(ApiError::unauthenticated("session expired or unknown"));
        }
        Err(err) => return Err(err.into()),
    };

    Span::current().record("user_id", tracing::field::display(identity.user_id));
    debug!(user_id = %identity.user_id, token = %token_fingerprint(&token), "session resolved");

    match req.extensions_mut().get_mut::<RequestContext>() {
        Some(context) => context.identity = Some(identity),
        None => {
            req.extensions_mut().insert(RequestContext {
                request_id: String::new(),
                identity: Some(identity),
            });
        }
    }

    Ok(next.run(req).await)
}
