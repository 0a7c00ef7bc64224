#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use server::{app_state::AppState, server::create_app_router, server::metrics_handle, store::MemoryStore};
use shared::{
    config::server::{Config, Profile},
    models::{ListingRef, UserProfile},
};
use tower::ServiceExt;
use uuid::Uuid;

pub struct User {
    pub id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(Config::default_for_profile(Profile::Test)).await
    }

    pub async fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::in_memory(Arc::new(config), store.clone());
        let router = create_app_router(Arc::new(state.clone()), metrics_handle());
        Self {
            router,
            state,
            store,
        }
    }

    pub async fn user(&self, name: &str) -> User {
        let id = Uuid::new_v4();
        self.store
            .insert_user(UserProfile {
                id,
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                image_url: None,
            })
            .await;
        let token = format!("session-{id}");
        self.store
            .insert_session(&token, id, chrono::Duration::hours(1))
            .await;
        User { id, token }
    }

    pub async fn listing(&self, owner: &User, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_listing(ListingRef {
                id,
                owner_id: owner.id,
                title: title.to_string(),
            })
            .await;
        id
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&User>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", user.token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.send(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn start_conversation(&self, user: &User, listing_id: Uuid) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/api/conversations",
            Some(user),
            Some(serde_json::json!({ "listing_id": listing_id })),
        )
        .await
    }

    pub async fn send_message(
        &self,
        user: &User,
        conversation_id: &str,
        content: &str,
    ) -> (StatusCode, Value) {
        self.call(
            "POST",
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(user),
            Some(serde_json::json!({ "content": content })),
        )
        .await
    }

    pub async fn messages(&self, user: &User, conversation_id: &str) -> (StatusCode, Value) {
        self.call(
            "GET",
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(user),
            None,
        )
        .await
    }

    /// Opens an SSE stream; the response is returned as soon as headers are ready.
    pub async fn open_stream(&self, user: &User, paths: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(format!("/api/realtime?paths={paths}"))
                .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// One parsed server-sent event.
#[derive(Debug)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_str(&self.data).unwrap()
    }
}

/// Reads SSE frames from a response body, skipping keep-alive comments.
pub struct FrameReader {
    stream: axum::body::BodyDataStream,
    buffer: String,
}

impl FrameReader {
    pub fn new(response: Response<Body>) -> Self {
        Self {
            stream: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    pub async fn next(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(2), self.next_inner())
            .await
            .ok()
            .flatten()
    }

    /// Reads frames until one with the given event name arrives.
    pub async fn next_named(&mut self, name: &str) -> Option<Frame> {
        loop {
            let frame = self.next().await?;
            if frame.event.as_deref() == Some(name) {
                return Some(frame);
            }
        }
    }

    async fn next_inner(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&raw) {
                    return Some(frame);
                }
                continue;
            }
            let chunk = self.stream.next().await?.ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}

fn parse_frame(raw: &str) -> Option<Frame> {
    let mut event = None;
    let mut data = Vec::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start().to_string());
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(Frame {
        event,
        data: data.join("\n"),
    })
}

/// Polls `check` until it holds or the deadline passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
