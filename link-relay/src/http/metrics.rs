//! Prometheus metrics endpoint.

use crate::server::PairLink;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(link): Extension<Arc<PairLink>>) -> impl IntoResponse {
    let m = link.metrics();

    // Gauges
    let sessions = m.active_sessions();
    let pending = link.service().pairing().live_count();
    let tracked_senders = link.service().limits().message_keys_count();

    // Counters
    let pair_requests = m.pair_requests_total.load(Ordering::Relaxed);
    let pairings = m.pairings_total.load(Ordering::Relaxed);
    let published = m.messages_published_total.load(Ordering::Relaxed);
    let delivered = m.messages_delivered_total.load(Ordering::Relaxed);
    let sessions_total = m.sessions_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP pairlink_sessions_active Number of running relay sessions
# TYPE pairlink_sessions_active gauge
pairlink_sessions_active {sessions}

# HELP pairlink_pair_requests_pending Pairing requests awaiting a response
# TYPE pairlink_pair_requests_pending gauge
pairlink_pair_requests_pending {pending}

# HELP pairlink_rate_limit_senders Senders tracked by the rate limiter
# TYPE pairlink_rate_limit_senders gauge
pairlink_rate_limit_senders {tracked_senders}

# HELP pairlink_info Server information
# TYPE pairlink_info gauge
pairlink_info{{version="{version}"}} 1

# HELP pairlink_pair_requests_total Pairing requests sent to devices
# TYPE pairlink_pair_requests_total counter
pairlink_pair_requests_total {pair_requests}

# HELP pairlink_pairings_total Pairing requests accepted
# TYPE pairlink_pairings_total counter
pairlink_pairings_total {pairings}

# HELP pairlink_messages_published_total Relay messages queued
# TYPE pairlink_messages_published_total counter
pairlink_messages_published_total {published}

# HELP pairlink_messages_delivered_total Relay messages sent to live sessions
# TYPE pairlink_messages_delivered_total counter
pairlink_messages_delivered_total {delivered}

# HELP pairlink_sessions_total Relay sessions started
# TYPE pairlink_sessions_total counter
pairlink_sessions_total {sessions_total}

# HELP pairlink_rate_limit_hits_total Total rate limit rejections
# TYPE pairlink_rate_limit_hits_total counter
pairlink_rate_limit_hits_total {rate_limits}

# HELP pairlink_errors_total Sessions ended by a transport error
# TYPE pairlink_errors_total counter
pairlink_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
