use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use bazaar_gateway::token;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token::bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;

    let claims = token::decode_claims(&state.jwt_secret, token).map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
