use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use townhall_events::DomainEvent;

use crate::connection::{CloseReason, Connection};
use crate::{responses, security, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamQuery {
    pub token: Option<String>,
}

/// Long-lived push stream for one dashboard session.
///
/// The first message is a ready marker without a `topic`; every later message
/// is one `DomainEvent` as JSON. There is no replay and no resume: a client
/// that reconnects starts from whatever is published next.
pub(crate) async fn events_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(principal) = security::authenticate(state.sessions(), &headers, q.token.as_deref())
    else {
        metrics::counter!("townhall_events_sse_rejected_total").increment(1);
        tracing::info!("push stream rejected: no valid session");
        return responses::unauthorized(Some("a valid session token is required"));
    };

    let conn = state.connections().open(state.bus(), principal);
    let (sub_id, rx) = state.bus().subscribe().into_parts();
    if !conn.attach(sub_id) {
        return responses::problem_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Connection Closed",
            Some("push connection closed while opening"),
        );
    }
    tracing::info!(
        connection_id = %conn.id(),
        principal = %conn.principal().name,
        role = ?conn.principal().role,
        open = state.connections().open_count(),
        "push connection open"
    );

    let ready = SseEvent::default().data(
        json!({
            "ready": true,
            "connectionId": conn.id(),
            "emittedAt": townhall_events::now_rfc3339(),
        })
        .to_string(),
    );
    let stream = EventStream {
        ready: Some(ready),
        rx,
        conn,
    };
    let keepalive = state.config().keepalive;
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(keepalive).text("keep-alive"))
        .into_response()
}

/// Serializes bus events for one connection and tears the connection down
/// when the body goes away.
struct EventStream {
    ready: Option<SseEvent>,
    rx: mpsc::Receiver<Arc<DomainEvent>>,
    conn: Arc<Connection>,
}

impl Stream for EventStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(ready) = this.ready.take() {
            return Poll::Ready(Some(Ok(ready)));
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => match SseEvent::default().json_data(&*event) {
                Ok(ev) => {
                    metrics::counter!("townhall_events_sse_sent_total").increment(1);
                    Poll::Ready(Some(Ok(ev)))
                }
                Err(err) => {
                    tracing::warn!(connection_id = %this.conn.id(), %err, "failed to encode event");
                    this.conn.close(CloseReason::EncodeFailed);
                    Poll::Ready(None)
                }
            },
            Poll::Ready(None) => {
                this.conn.close(CloseReason::BusDropped);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.conn.close(CloseReason::ClientGone);
    }
}

/// Publish a mutation on behalf of an out-of-process handler. The event is
/// stamped on arrival like any other recorded mutation.
pub(crate) async fn events_publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<DomainEvent>,
) -> axum::response::Response {
    let Some(principal) = security::authenticate(state.sessions(), &headers, None) else {
        return responses::unauthorized(None);
    };
    if !principal.is_admin() {
        return responses::forbidden(Some("publishing requires an admin session"));
    }
    if !event.has_known_topic() {
        return responses::problem_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Unknown Topic",
            Some(&format!("topic '{}' is not a known topic", event.topic)),
        );
    }
    let DomainEvent {
        topic,
        action,
        id,
        payload,
        ..
    } = event;
    let report = state.mutations().record(&topic, action, id, payload);
    (StatusCode::ACCEPTED, Json(report)).into_response()
}

pub(crate) async fn events_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    match security::authenticate(state.sessions(), &headers, None) {
        Some(p) if p.is_admin() => {}
        Some(_) => return responses::forbidden(None),
        None => return responses::unauthorized(None),
    }
    Json(json!({
        "bus": state.bus().stats(),
        "connections": state.connections().snapshot(),
    }))
    .into_response()
}

pub(crate) async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}
