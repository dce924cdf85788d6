//! Per-connection session multiplexing.
//!
//! A session interleaves two event sources on one duplex connection:
//! inbound write requests from the peer, and the peer's own relay queue.
//!
//! ```text
//!            ┌──────────── select! ────────────┐
//!  peer ───► │ receive_frame ─► publish ─► ack │ ───► peer
//!            │ relay rx ─────► data frame      │
//!            └─────────────────────────────────┘
//!                    ▲
//!     consume task ──┘  (channel of 1, aborted when the session ends)
//! ```
//!
//! Delivery is at most once: a message already handed to the session when
//! the peer disconnects is not put back.

use crate::auth::Principal;
use crate::error::LinkError;
use crate::relay::RelayConsumer;
use crate::service::LinkService;
use crate::status::{error_frame, ApplicationStatus};
use crate::transport::{SessionTransport, TransportError, CLOSE_NORMAL};
use link_types::{InboundRequest, OutboundFrame, RelayMessage, ResponseFrame};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs sessions for authenticated principals.
#[derive(Debug, Clone)]
pub struct SessionMultiplexer {
    service: Arc<LinkService>,
    consume_timeout: Duration,
}

impl SessionMultiplexer {
    /// Create a multiplexer; `consume_timeout` is the relay poll slice.
    pub fn new(service: Arc<LinkService>, consume_timeout: Duration) -> Self {
        Self {
            service,
            consume_timeout,
        }
    }

    /// Run a session until the peer disconnects or the transport fails.
    ///
    /// A peer disconnect is a normal end (`Ok`). Any other transport error
    /// is returned after the consume task has been stopped. The transport is
    /// closed either way.
    pub async fn run_session<T: SessionTransport>(
        &self,
        mut transport: T,
        principal: Principal,
    ) -> Result<(), TransportError> {
        tracing::info!("Session started for {}", principal.id);
        let metrics = self.service.metrics();
        metrics.sessions_total.fetch_add(1, Ordering::Relaxed);
        metrics.active_sessions.fetch_add(1, Ordering::Relaxed);

        let (tx, mut rx) = mpsc::channel(1);
        let consumer = self
            .service
            .relay()
            .consumer(principal.id, self.consume_timeout);
        let consume_task = AbortOnDrop(tokio::spawn(forward_relay(consumer, tx)));

        let result = self.drive(&mut transport, &principal, &mut rx).await;

        drop(consume_task);
        transport.close(CLOSE_NORMAL, "session ended").await;
        metrics.active_sessions.fetch_sub(1, Ordering::Relaxed);

        match &result {
            Ok(()) => tracing::info!("Session ended for {}", principal.id),
            Err(e) => {
                metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Session for {} failed: {}", principal.id, e);
            }
        }
        result
    }

    async fn drive<T: SessionTransport>(
        &self,
        transport: &mut T,
        principal: &Principal,
        relay_rx: &mut mpsc::Receiver<RelayMessage>,
    ) -> Result<(), TransportError> {
        let mut liveness = transport.liveness();
        while transport.is_live() {
            let frame = tokio::select! {
                () = gone(&mut liveness) => return Ok(()),
                inbound = transport.receive_frame() => match inbound {
                    Ok(text) => OutboundFrame::Response(self.handle_inbound(principal, &text).await),
                    Err(TransportError::MalformedFrame(reason)) => {
                        tracing::debug!("Malformed frame from {}: {}", principal.id, reason);
                        OutboundFrame::Response(error_frame(&LinkError::MalformedMessage { reason }))
                    }
                    Err(TransportError::Disconnected) => return Ok(()),
                    Err(e) => return Err(e),
                },
                relayed = relay_rx.recv() => match relayed {
                    Some(message) => {
                        self.service
                            .metrics()
                            .messages_delivered_total
                            .fetch_add(1, Ordering::Relaxed);
                        OutboundFrame::Data(message.into())
                    }
                    None => {
                        tracing::error!("Relay consumer for {} stopped", principal.id);
                        return Ok(());
                    }
                },
            };

            match send(transport, &frame).await {
                Ok(()) => {}
                Err(TransportError::Disconnected) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Turn one inbound frame into its ack or error reply.
    async fn handle_inbound(&self, principal: &Principal, text: &str) -> ResponseFrame {
        let request = match InboundRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Malformed frame from {}: {}", principal.id, e);
                return error_frame(&LinkError::from(e));
            }
        };

        let message_id = request.message_id.clone();
        let published = self
            .service
            .publish_message(
                principal,
                request.target_user_id,
                request.request_type.kind(),
                request.message_id,
                request.data,
            )
            .await;

        match published {
            Ok(()) => ResponseFrame::success(
                ApplicationStatus::Success.code(),
                "enqueued",
                Some(json!({ "message_id": message_id })),
            ),
            Err(e) => {
                tracing::debug!("Publish from {} refused: {}", principal.id, e);
                error_frame(&e)
            }
        }
    }
}

/// Resolves once the liveness flag reads false.
async fn gone(liveness: &mut watch::Receiver<bool>) {
    let _ = liveness.wait_for(|live| !live).await;
}

async fn send<T: SessionTransport>(
    transport: &mut T,
    frame: &OutboundFrame,
) -> Result<(), TransportError> {
    let text = frame
        .to_json()
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    transport.send_frame(text).await
}

/// Move relay messages into the session until it goes away.
///
/// A slot in the channel is reserved before popping, so at most one popped
/// message waits for the session at any time.
async fn forward_relay(mut consumer: RelayConsumer, tx: mpsc::Sender<RelayMessage>) {
    loop {
        let Ok(permit) = tx.reserve().await else {
            return;
        };
        match consumer.next().await {
            Ok(Some(message)) => permit.send(message),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Relay consume for {} failed: {}", consumer.recipient(), e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::tests::{alice, bob, phone, service, service_with};
    use crate::storage::PairingStore;
    use crate::transport::{MockPeer, MockTransport};
    use link_types::{DataFrame, MessageKind, PrincipalId};
    use serde_json::Value;

    async fn next_frame(peer: &mut MockPeer) -> OutboundFrame {
        let text = tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .expect("frame in time")
            .expect("transport open");
        OutboundFrame::from_json(&text).unwrap()
    }

    async fn next_response(peer: &mut MockPeer) -> ResponseFrame {
        match next_frame(peer).await {
            OutboundFrame::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    async fn next_data(peer: &mut MockPeer) -> DataFrame {
        match next_frame(peer).await {
            OutboundFrame::Data(data) => data,
            other => panic!("expected data, got {other:?}"),
        }
    }

    fn enqueue(target: PrincipalId, message_id: &str, data: Value) -> String {
        json!({
            "request_type": "enqueue_request",
            "message_id": message_id,
            "target_user_id": target,
            "data": data,
        })
        .to_string()
    }

    #[tokio::test]
    async fn inbound_request_is_acked_and_queued() {
        let (service, store) = service();
        store.create_edge(alice().id, phone().id).await.unwrap();
        let mux = SessionMultiplexer::new(service.clone(), Duration::from_millis(50));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, alice()).await });

        peer.send(enqueue(phone().id, "x1", json!({"k": 1})));
        let ack = next_response(&mut peer).await;

        assert!(ack.ok);
        assert_eq!(ack.application_status_code, 0);
        assert_eq!(ack.data, Some(json!({"message_id": "x1"})));
        assert_eq!(service.relay().pending(phone().id).await.unwrap(), 1);

        peer.hang_up();
        session.await.unwrap().unwrap();
        assert_eq!(peer.close_frame().map(|(code, _)| code), Some(CLOSE_NORMAL));

        let metrics = service.metrics();
        assert_eq!(metrics.sessions_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.messages_published_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_frame_keeps_session_open() {
        let (service, store) = service();
        store.create_edge(alice().id, phone().id).await.unwrap();
        let mux = SessionMultiplexer::new(service, Duration::from_millis(50));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, alice()).await });

        peer.send("{not json");
        let error = next_response(&mut peer).await;
        assert!(!error.ok);
        assert_eq!(error.application_status_code, 400);

        peer.send(enqueue(phone().id, "after", json!(null)));
        assert!(next_response(&mut peer).await.ok);

        peer.hang_up();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn domain_errors_become_error_frames() {
        let (service, _) = service();
        let mux = SessionMultiplexer::new(service, Duration::from_millis(50));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, bob()).await });

        peer.send(enqueue(PrincipalId::new(404), "a", json!(null)));
        assert_eq!(next_response(&mut peer).await.application_status_code, 404);

        peer.send(enqueue(phone().id, "b", json!(null)));
        assert_eq!(next_response(&mut peer).await.application_status_code, 423);

        peer.hang_up();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn queued_messages_are_delivered_in_order() {
        let (service, store) = service();
        store.create_edge(alice().id, phone().id).await.unwrap();
        for id in ["m1", "m2", "m3"] {
            service
                .publish_message(&alice(), phone().id, MessageKind::Request, id.into(), json!(id))
                .await
                .unwrap();
        }

        let mux = SessionMultiplexer::new(service.clone(), Duration::from_millis(50));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, phone()).await });

        for id in ["m1", "m2", "m3"] {
            let data = next_data(&mut peer).await;
            assert_eq!(data.request_uuid, id);
            assert_eq!(data.sender_user_id, alice().id);
            assert_eq!(data.data, json!(id));
        }

        // Live delivery while connected.
        service
            .publish_message(&alice(), phone().id, MessageKind::Response, "m4".into(), json!(4))
            .await
            .unwrap();
        let live = next_data(&mut peer).await;
        assert_eq!(live.request_uuid, "m4");
        assert_eq!(live.data_type, MessageKind::Response);
        assert_eq!(
            service.metrics().messages_delivered_total.load(Ordering::Relaxed),
            4
        );

        peer.hang_up();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transport_failure_is_returned() {
        let (service, _) = service();
        let mux = SessionMultiplexer::new(service, Duration::from_millis(50));
        let (transport, peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, alice()).await });

        peer.fail(TransportError::ReceiveFailed("reset".into()));

        let result = session.await.unwrap();
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));
        assert!(peer.close_frame().is_some());
    }

    #[tokio::test]
    async fn undecodable_frame_gets_error_reply() {
        let (service, _) = service();
        let mux = SessionMultiplexer::new(service, Duration::from_millis(50));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, alice()).await });

        peer.fail(TransportError::MalformedFrame("binary frame is not UTF-8".into()));
        let error = next_response(&mut peer).await;
        assert!(!error.ok);
        assert_eq!(error.application_status_code, 400);

        peer.hang_up();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idle_session_ends_when_liveness_drops() {
        let (service, _) = service();
        let mux = SessionMultiplexer::new(service.clone(), Duration::from_millis(50));
        let (transport, peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, phone()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        peer.set_live(false);

        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session ends without traffic")
            .unwrap()
            .unwrap();
        assert_eq!(peer.close_frame().map(|(code, _)| code), Some(CLOSE_NORMAL));
        assert_eq!(service.metrics().active_sessions(), 0);
    }

    #[tokio::test]
    async fn consume_task_stops_with_session() {
        let (service, store) = service_with(Config::default());
        store.create_edge(alice().id, phone().id).await.unwrap();
        let mux = SessionMultiplexer::new(service.clone(), Duration::from_millis(20));
        let (transport, mut peer) = MockTransport::pair();
        let session = tokio::spawn(async move { mux.run_session(transport, phone()).await });

        peer.hang_up();
        session.await.unwrap().unwrap();
        // Let the aborted consume task unwind.
        tokio::task::yield_now().await;

        service
            .publish_message(&alice(), phone().id, MessageKind::Request, "later".into(), json!(null))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Nobody popped it: the message waits for the next session.
        assert_eq!(service.relay().pending(phone().id).await.unwrap(), 1);
        assert!(peer.recv().await.is_none());
    }
}
