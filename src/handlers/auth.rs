use axum::{
    extract::{Extension, State},
    http::{
        header::{SET_COOKIE, USER_AGENT},
        HeaderMap, HeaderName, StatusCode,
    },
    response::AppendHeaders,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::AuthSession,
    models::{DeviceView, LoginRequest, RegisterRequest, User, UserResponse},
    repositories::UserStore,
    state::AppState,
    types::UserId,
    utils::{
        cookies::{build_auth_cookie, build_clear_cookie, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME},
        password::{hash_password, verify_password},
    },
};

type CookieHeaders = AppendHeaders<[(HeaderName, String); 2]>;

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    payload.validate()?;

    if state.users.find_by_email(&payload.email).await?.is_some() {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;
    let now = Utc::now();
    let user = User {
        id: UserId::new(),
        email: payload.email,
        password_hash,
        display_name: payload.display_name,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    state.users.create(&user).await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "User registered successfully"})),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieHeaders, Json<Value>), AppError> {
    // One rejection message for unknown email, wrong password and disabled
    // accounts, so responses cannot be used to enumerate accounts.
    let user = state
        .users
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(invalid_credentials)?;
    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(invalid_credentials());
    }
    if !user.is_active {
        return Err(invalid_credentials());
    }

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    let ip_address = client_ip(&headers);

    let tokens = state
        .sessions
        .create_session(&user, user_agent, &ip_address)
        .await?;

    let options = state.config.cookie_options();
    let cookies = AppendHeaders([
        (
            SET_COOKIE,
            build_auth_cookie(
                ACCESS_COOKIE_NAME,
                &tokens.access_token,
                state.config.access_token_ttl(),
                options,
            ),
        ),
        (
            SET_COOKIE,
            build_auth_cookie(
                REFRESH_COOKIE_NAME,
                &tokens.refresh_token,
                state.config.refresh_token_ttl(),
                options,
            ),
        ),
    ]);

    Ok((cookies, Json(json!({"message": "Logged in successfully"}))))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<(CookieHeaders, Json<Value>), AppError> {
    state.sessions.deactivate_session(auth.session_id).await?;

    let options = state.config.cookie_options();
    let cookies = AppendHeaders([
        (SET_COOKIE, build_clear_cookie(ACCESS_COOKIE_NAME, options)),
        (SET_COOKIE, build_clear_cookie(REFRESH_COOKIE_NAME, options)),
    ]);
    Ok((cookies, Json(json!({"message": "Logged out successfully"}))))
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Json<Value>, AppError> {
    let count = state
        .sessions
        .deactivate_all_user_sessions(auth.user_id, Some(auth.session_id))
        .await?;

    Ok(Json(json!({
        "message": "Logged out from all other devices",
        "sessions_deactivated": count,
    })))
}

pub async fn me(Extension(user): Extension<User>) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

pub async fn devices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Json<Vec<DeviceView>>, AppError> {
    let devices = state.sessions.list_user_devices(auth.user_id).await?;
    Ok(Json(devices))
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid email or password".to_string())
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "0.0.0.0".to_string())
}
