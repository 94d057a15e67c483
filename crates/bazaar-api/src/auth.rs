use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::SaltString,
};
use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::WithRejection;
use rand_core::OsRng;
use tracing::{error, info};

use bazaar_gateway::token::create_token;
use bazaar_types::api::{ApiResponse, AuthResponse, LoginRequest, RegisterRequest};

use crate::error::{ApiError, PersistenceExt};
use crate::run_blocking;
use crate::state::AppState;

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    // Validate input
    let username_chars = req.username.chars().count();
    if !(3..=32).contains(&username_chars) {
        return Err(ApiError::Validation("Username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("Password must be at least 8 characters"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Persistence("Failed to register")
        })?
        .to_string();

    let db = state.db.clone();
    let username = req.username.clone();
    let user_id = run_blocking(move || db.create_user(&username, &password_hash))
        .await
        .or_persistence("Failed to register")?
        .ok_or(ApiError::Conflict("Username is taken"))?;

    let token = create_token(&state.jwt_secret, user_id, &req.username).or_persistence("Failed to register")?;
    info!("Registered user {} ({})", req.username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(AuthResponse {
            user_id,
            username: req.username,
            token,
        })),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let db = state.db.clone();
    let username = req.username.clone();
    let user = run_blocking(move || db.get_user_by_username(&username))
        .await
        .or_persistence("Failed to log in")?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Corrupt password hash for user {}: {}", user.id, e);
        ApiError::Persistence("Failed to log in")
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = create_token(&state.jwt_secret, user.id, &user.username).or_persistence("Failed to log in")?;

    Ok(Json(ApiResponse::ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    })))
}
