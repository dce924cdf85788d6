//! Pairing and ownership endpoints.

use super::{reply, ApiError, Authenticated};
use crate::error::LinkError;
use crate::pairing::{PairingRequest, PairingState};
use crate::server::PairLink;
use crate::service::DeviceRef;
use crate::status::ApplicationStatus;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::response::Response;
use axum::{Extension, Json};
use link_types::{PrincipalId, RequestId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Body of `POST /devices/pair`. One of the two fields must be set.
#[derive(Debug, Deserialize)]
pub struct PairPayload {
    device_id: Option<PrincipalId>,
    device_username: Option<String>,
}

impl PairPayload {
    fn device(self) -> Result<DeviceRef, LinkError> {
        match (self.device_id, self.device_username) {
            (Some(id), _) => Ok(DeviceRef::Id(id)),
            (None, Some(name)) => Ok(DeviceRef::Username(name)),
            (None, None) => Err(LinkError::MalformedMessage {
                reason: "device_id or device_username is required".into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollParams {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondAction {
    Accept,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct RespondPayload {
    request_uuid: RequestId,
    action: RespondAction,
}

#[derive(Debug, Deserialize)]
pub struct UnpairPayload {
    device_id: PrincipalId,
}

fn describe(request: &PairingRequest) -> serde_json::Value {
    json!({
        "request_id": request.id(),
        "requester": request.requester(),
        "created_at": request.created_at(),
        "state": request.state(),
    })
}

/// `POST /devices/pair`: ask a device to pair and wait for the answer.
pub async fn pair_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(user): Authenticated,
    payload: Result<Json<PairPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let outcome = link
        .service()
        .request_pairing(&user, payload.device()?)
        .await?;

    let (status, message) = match outcome.state {
        PairingState::Accepted => (ApplicationStatus::PairAccepted, "pair request accepted"),
        _ => (ApplicationStatus::PairRejected, "pair request rejected"),
    };
    Ok(reply(status, message, Some(json!(outcome))))
}

/// `GET /devices/pair/requests`: long-poll for requests addressed to the
/// calling device.
pub async fn pending_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(device): Authenticated,
    params: Result<Query<PollParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let timeout = params.timeout_secs.map(Duration::from_secs);
    let requests = link.service().pending_for_device(&device, timeout).await?;

    let listed: Vec<_> = requests.iter().map(|r| describe(r)).collect();
    Ok(reply(
        ApplicationStatus::Success,
        "ok",
        Some(json!({ "pair_requests": listed })),
    ))
}

/// `POST /devices/pair/requests`: accept or reject a request.
pub async fn respond_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(device): Authenticated,
    payload: Result<Json<RespondPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let accept = payload.action == RespondAction::Accept;
    let request = link
        .service()
        .respond(&device, payload.request_uuid, accept)
        .await?;

    Ok(reply(
        ApplicationStatus::Updated,
        "updated",
        Some(describe(&request)),
    ))
}

/// `GET /devices`: devices owned by the calling user.
pub async fn list_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(user): Authenticated,
) -> Result<Response, ApiError> {
    let devices = link.service().devices_of(&user).await?;
    Ok(reply(
        ApplicationStatus::Success,
        "ok",
        Some(json!({ "devices": devices })),
    ))
}

/// `GET /devices/me/owner`: owner of the calling device, or null.
pub async fn owner_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(device): Authenticated,
) -> Result<Response, ApiError> {
    let owner = link.service().owner_of(&device).await?;
    Ok(reply(
        ApplicationStatus::Success,
        "ok",
        Some(json!({ "owner": owner })),
    ))
}

/// `POST /devices/unpair`: remove a device's pairing.
pub async fn unpair_handler(
    Extension(link): Extension<Arc<PairLink>>,
    Authenticated(caller): Authenticated,
    payload: Result<Json<UnpairPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    link.service().unpair(&caller, payload.device_id).await?;
    Ok(reply(ApplicationStatus::Updated, "unpaired", None))
}
