//! HTTP endpoints for pairlink-relay.
//!
//! Health and metrics, the pairing API under `/devices`, relay writes under
//! `/storage/write`, and the relay session upgrade at `/storage/ws`.
//! Every JSON body is a [`ResponseFrame`] envelope.

mod devices;
pub mod health;
mod metrics;
mod storage;

use crate::auth::Principal;
use crate::config::ConfigError;
use crate::error::LinkError;
use crate::server::PairLink;
use crate::status::{error_frame, ApplicationStatus};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Extension, Json, Router};
use link_types::ResponseFrame;
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(link: Arc<PairLink>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/devices", get(devices::list_handler))
        .route("/devices/me/owner", get(devices::owner_handler))
        .route("/devices/pair", post(devices::pair_handler))
        .route(
            "/devices/pair/requests",
            get(devices::pending_handler).post(devices::respond_handler),
        )
        .route("/devices/unpair", post(devices::unpair_handler))
        .route("/storage/write/request", post(storage::write_request_handler))
        .route("/storage/write/response", post(storage::write_response_handler))
        .route("/storage/ws", get(storage::ws_handler));

    if link.config().server.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(link))
}

/// Successful envelope with the status's HTTP code.
fn reply(status: ApplicationStatus, message: &str, data: Option<serde_json::Value>) -> Response {
    (
        status.http_status(),
        Json(ResponseFrame::success(status.code(), message, data)),
    )
        .into_response()
}

/// A [`LinkError`] rendered as an error envelope.
#[derive(Debug)]
pub struct ApiError(LinkError);

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(LinkError::MalformedMessage {
            reason: rejection.body_text(),
        })
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(LinkError::MalformedMessage {
            reason: rejection.body_text(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = ApplicationStatus::from(&self.0);
        if status == ApplicationStatus::Internal {
            tracing::error!("Request failed: {}", self.0);
        }
        (status.http_status(), Json(error_frame(&self.0))).into_response()
    }
}

/// The principal behind the request's `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let link = parts
            .extensions
            .get::<Arc<PairLink>>()
            .cloned()
            .ok_or_else(|| {
                LinkError::Config(ConfigError::Invalid("server state not installed".into()))
            })?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(LinkError::Unauthorized)?;

        let principal = link.authenticator().authenticate(token).await?;
        Ok(Self(principal))
    }
}

/// Token of a `Bearer <token>` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::config::Config;
    use crate::storage::{MemoryPairingStore, MemoryQueueBackend, PairingStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use link_types::PrincipalId;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_link_with_store(config: Config) -> (Arc<PairLink>, Arc<MemoryPairingStore>) {
        let mut auth = StaticAuthenticator::default();
        auth.insert(Principal::user(1, "alice"), "t-alice").unwrap();
        auth.insert(Principal::device(2, "alice-phone"), "t-phone")
            .unwrap();
        auth.insert(Principal::user(4, "bob"), "t-bob").unwrap();
        let store = Arc::new(MemoryPairingStore::new());
        let link = PairLink::new(
            config,
            store.clone(),
            Arc::new(MemoryQueueBackend::new()),
            Arc::new(auth),
        )
        .unwrap();
        (Arc::new(link), store)
    }

    fn test_link(config: Config) -> Arc<PairLink> {
        test_link_with_store(config).0
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, ResponseFrame) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_link(Config::default()));

        let response = app.oneshot(get("/health", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_router(test_link(Config::default()));

        let response = app.oneshot(get("/metrics", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.server.metrics_enabled = false;
        let app = build_router(test_link(config));

        let response = app.oneshot(get("/metrics", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_unauthorized() {
        let app = build_router(test_link(Config::default()));

        let (status, body) = call(&app, get("/devices", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.application_status_code, 401);
        assert!(!body.ok);

        let (status, _) = call(&app, get("/devices", Some("t-nobody"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[tokio::test]
    async fn pairing_over_http() {
        let link = test_link(Config::default());
        let app = build_router(link.clone());

        let requester = {
            let app = app.clone();
            tokio::spawn(async move {
                call(
                    &app,
                    post("/devices/pair", "t-alice", json!({"device_username": "alice-phone"})),
                )
                .await
            })
        };

        let (status, pending) = call(&app, get("/devices/pair/requests", Some("t-phone"))).await;
        assert_eq!(status, StatusCode::OK);
        let requests = pending.data.unwrap()["pair_requests"].clone();
        assert_eq!(requests.as_array().map(Vec::len), Some(1));
        assert_eq!(requests[0]["requester"]["username"], "alice");
        let request_id = requests[0]["request_id"].clone();

        let (status, updated) = call(
            &app,
            post(
                "/devices/pair/requests",
                "t-phone",
                json!({"request_uuid": request_id, "action": "accept"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated.application_status_code, 1);

        let (status, outcome) = requester.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome.application_status_code, 100);

        let (_, owner) = call(&app, get("/devices/me/owner", Some("t-phone"))).await;
        assert_eq!(owner.data.unwrap()["owner"]["id"], 1);

        let (_, devices) = call(&app, get("/devices", Some("t-alice"))).await;
        assert_eq!(devices.data.unwrap()["devices"][0]["username"], "alice-phone");

        // Second attempt: the device already has an owner.
        let (status, again) = call(
            &app,
            post("/devices/pair", "t-alice", json!({"device_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again.application_status_code, 409);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_pair_request_reports_rejected() {
        let app = build_router(test_link(Config::default()));

        let (status, outcome) = call(
            &app,
            post("/devices/pair", "t-alice", json!({"device_id": 2})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome.application_status_code, 101);
        assert_eq!(outcome.data.unwrap()["state"], "rejected");
    }

    #[tokio::test]
    async fn pair_payload_needs_a_device() {
        let app = build_router(test_link(Config::default()));

        let (status, body) = call(&app, post("/devices/pair", "t-alice", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.application_status_code, 400);
    }

    #[tokio::test]
    async fn users_cannot_poll_for_requests() {
        let app = build_router(test_link(Config::default()));

        let (status, body) = call(
            &app,
            get("/devices/pair/requests?timeout_secs=0", Some("t-alice")),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.application_status_code, 403);
    }

    #[tokio::test]
    async fn device_poll_times_out_empty() {
        let app = build_router(test_link(Config::default()));

        let (status, body) = call(
            &app,
            get("/devices/pair/requests?timeout_secs=0", Some("t-phone")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["pair_requests"], json!([]));
    }

    #[tokio::test]
    async fn write_request_is_queued_for_paired_device() {
        let (link, store) = test_link_with_store(Config::default());
        store
            .create_edge(PrincipalId::new(1), PrincipalId::new(2))
            .await
            .unwrap();
        let app = build_router(link.clone());

        let (status, body) = call(
            &app,
            post(
                "/storage/write/request",
                "t-alice",
                json!({"target_user_id": 2, "data": {"op": "ping"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let request_uuid = body.data.unwrap()["request_uuid"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, _) = call(
            &app,
            post(
                "/storage/write/response",
                "t-phone",
                json!({"target_user_id": 1, "response_to_request_uuid": request_uuid, "data": {"op": "pong"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let relay = link.service().relay();
        let to_phone = relay
            .consume(PrincipalId::new(2), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to_phone.correlation_id, request_uuid);
        assert_eq!(to_phone.data, json!({"op": "ping"}));
        let to_alice = relay
            .consume(PrincipalId::new(1), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to_alice.correlation_id, request_uuid);
    }

    #[tokio::test]
    async fn cross_network_write_is_refused() {
        let app = build_router(test_link(Config::default()));

        let (status, body) = call(
            &app,
            post(
                "/storage/write/request",
                "t-bob",
                json!({"target_user_id": 2, "data": null}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.application_status_code, 423);
    }
}
