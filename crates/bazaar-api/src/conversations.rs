use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;

use bazaar_types::api::{
    ApiResponse, Claims, EnsureConversationRequest, EnsureConversationResponse, MessagePage,
    SendMessageRequest, TypingRequest,
};
use bazaar_types::models::{ChatMessage, Conversation};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 100;
const MAX_PAGE: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message from the previous page.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE
}

/// POST /chat/conversations
pub async fn ensure_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<EnsureConversationRequest>, ApiError>,
) -> Result<Json<ApiResponse<EnsureConversationResponse>>, ApiError> {
    let conversation_id = state
        .chat
        .ensure_conversation(claims.sub, req.product_id, req.buyer_id, req.seller_id)
        .await?;
    Ok(Json(ApiResponse::ok(EnsureConversationResponse { conversation_id })))
}

/// GET /chat/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, ApiError> {
    let conversations = state.chat.conversations(claims.sub).await?;
    Ok(Json(ApiResponse::ok(conversations)))
}

/// GET /chat/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(conversation_id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
) -> Result<Json<ApiResponse<MessagePage>>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let messages = state
        .chat
        .messages(claims.sub, conversation_id, limit, query.before)
        .await?;
    Ok(Json(ApiResponse::ok(MessagePage { messages })))
}

/// POST /chat/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<Json<ApiResponse<ChatMessage>>, ApiError> {
    let message = state
        .chat
        .send_message(claims.sub, req.conversation_id, req.content)
        .await?;
    Ok(Json(ApiResponse::ok(message)))
}

/// POST /chat/typing
pub async fn typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<TypingRequest>, ApiError>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.chat.typing(claims.sub, req.conversation_id).await?;
    Ok(Json(ApiResponse::empty()))
}
