use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cookie::Cookie;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Caller resolved from a session token. Treated as a trusted assertion by
/// everything behind the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
}

/// SHA-256 of the raw token; the only form persisted in `feira.sessions`.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.trim().as_bytes()).to_vec()
}

/// Short, non-reversible tag for a token, safe to put in logs.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let hash = hash_token(token);
    URL_SAFE_NO_PAD.encode(&hash[..6])
}

/// Reads the session token from the named cookie, falling back to an
/// `Authorization: Bearer` header.
pub fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_session_cookie(headers, cookie_name).or_else(|| extract_bearer(headers))
}

fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value.to_string()).flatten())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.trim().is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
