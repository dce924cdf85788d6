//! Relay write endpoints and the relay session upgrade.

use super::{reply, ApiError, Authenticated};
use crate::server::PairLink;
use crate::status::ApplicationStatus;
use crate::transport::WsTransport;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use link_types::{MessageKind, PrincipalId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct WriteRequestPayload {
    target_user_id: PrincipalId,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct WriteResponsePayload {
    target_user_id: PrincipalId,
    response_to_request_uuid: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// `POST /storage/write/request`: queue a new request.
///
/// The server picks the correlation id and returns it as `request_uuid`.
pub async fn write_request_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(sender): Authenticated,
    payload: Result<Json<WriteRequestPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let request_uuid = uuid::Uuid::new_v4().to_string();

    link.service()
        .publish_message(
            &sender,
            payload.target_user_id,
            MessageKind::Request,
            request_uuid.clone(),
            payload.data,
        )
        .await?;

    Ok(reply(
        ApplicationStatus::Success,
        "enqueued",
        Some(json!({ "request_uuid": request_uuid })),
    ))
}

/// `POST /storage/write/response`: queue a response to an earlier request.
pub async fn write_response_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(sender): Authenticated,
    payload: Result<Json<WriteResponsePayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;

    link.service()
        .publish_message(
            &sender,
            payload.target_user_id,
            MessageKind::Response,
            payload.response_to_request_uuid,
            payload.data,
        )
        .await?;

    Ok(reply(ApplicationStatus::Success, "enqueued", None))
}

/// `GET /storage/ws`: upgrade to a relay session.
pub async fn ws_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(principal): Authenticated,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        // Failures are logged by the session itself.
        let _ = link.run_session(WsTransport::new(socket), principal).await;
    })
}
