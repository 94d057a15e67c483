pub mod auth;
pub mod chat;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod participants;
pub mod state;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

use bazaar_gateway::stream::chat_stream;
use bazaar_types::api::{ApiResponse, HealthResponse};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Build the full HTTP surface. Cross-cutting layers (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route(
            "/chat/conversations",
            post(conversations::ensure_conversation).get(conversations::list_conversations),
        )
        .route("/chat/conversations/{id}/messages", get(conversations::list_messages))
        .route("/chat/messages", post(conversations::send_message))
        .route("/chat/typing", post(conversations::typing))
        .route("/notifications", get(notifications::list))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}", delete(notifications::remove))
        .layer(from_fn_with_state(state.clone(), require_auth));

    // The stream authenticates itself: it also accepts ?token=
    let stream_routes = Router::new().route("/chat/stream", get(chat_stream));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(stream_routes)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".into(),
        connected_users: state.bus.connected_users(),
    }))
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
