//! Server-Sent Events endpoint that pushes a user's chat events.
//!
//! A connection moves through unauthenticated -> authenticating ->
//! streaming -> closed. Authentication failure closes it with a 401 before
//! anything is registered. Once streaming, the response body owns the
//! `Subscription`; when the client goes away the body is dropped and the
//! registration with it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use bazaar_types::api::{ApiResponse, Claims};

use crate::bus::{EventBus, Subscription};
use crate::token;

/// Comment frames keep idle proxies from reaping the connection and surface
/// dead peers on the next write.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct StreamState {
    pub bus: EventBus,
    pub jwt_secret: Arc<str>,
    pub keep_alive: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Fallback credential for clients that cannot set headers (EventSource).
    pub token: Option<String>,
}

/// GET /chat/stream — long-lived event stream for the caller.
pub async fn chat_stream(
    State(state): State<StreamState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Response {
    let claims = match authenticate(&state.jwt_secret, &headers, query.token.as_deref()) {
        Some(claims) => claims,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::failure("Unauthorized")),
            )
                .into_response();
        }
    };

    let subscription = state.bus.register(claims.sub);
    info!(
        "{} ({}) opened chat stream ({} open)",
        claims.username,
        claims.sub,
        state.bus.subscriber_count(claims.sub)
    );

    Sse::new(event_stream(subscription))
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response()
}

/// Any Authorization header is authoritative: it must carry a valid bearer
/// token. The query parameter is only consulted when no header was sent.
fn authenticate(secret: &str, headers: &HeaderMap, query_token: Option<&str>) -> Option<Claims> {
    let (token, source) = if headers.contains_key(header::AUTHORIZATION) {
        let Some(t) = token::bearer_token(headers) else {
            warn!("Rejected chat stream: Authorization header is not a bearer token");
            return None;
        };
        (t, "header")
    } else {
        (query_token.filter(|t| !t.is_empty())?, "query")
    };
    match token::decode_claims(secret, token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            warn!("Rejected chat stream token from {}: {}", source, e);
            None
        }
    }
}

/// Frames each queued payload as one `data:` event. Ends when the queue is
/// closed by deregistration.
fn event_stream(
    mut subscription: Subscription,
) -> impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(payload) = subscription.recv().await {
            yield Ok(Event::default().data(&*payload));
        }
        debug!("Chat stream for user {} closed by server", subscription.user_id());
    }
}
