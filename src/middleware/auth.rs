//! Request admission: the ordered pipeline composing "check access token,
//! fall back to refresh, admit or deny".

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::models::{RefreshedAccess, User};
use crate::repositories::UserStore;
use crate::state::AppState;
use crate::types::{SessionId, UserId};
use crate::utils::cookies::{
    build_auth_cookie, build_clear_cookie, extract_cookie_value, ACCESS_COOKIE_NAME,
    REFRESH_COOKIE_NAME,
};

/// Identity attached to the request once admission succeeds.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: UserId,
    pub session_id: SessionId,
}

struct Admission {
    user: User,
    auth: AuthSession,
    /// Present when admission went through the refresh fallback; the new
    /// access token must reach the client as a cookie.
    refreshed: Option<RefreshedAccess>,
}

enum Denial {
    /// No usable credentials at all.
    Unauthenticated,
    /// Credentials parsed but the session or user no longer admits requests.
    /// Cookies are left alone: the refresh token may still reactivate the
    /// login once the stale access token has expired.
    SessionInvalid,
    /// The refresh fallback itself failed. Both cookies get cleared.
    RefreshFailed,
    Error(AppError),
}

pub async fn auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let access_token = extract_access_token(request.headers());
    let refresh_token = request
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| extract_cookie_value(raw, REFRESH_COOKIE_NAME));

    match admit(&state, access_token, refresh_token).await {
        Ok(admission) => {
            let auth = admission.auth.clone();
            request.extensions_mut().insert(admission.auth);
            request.extensions_mut().insert(admission.user);

            let mut response = next.run(request).await;

            if let Some(grant) = admission.refreshed {
                let cookie = build_auth_cookie(
                    ACCESS_COOKIE_NAME,
                    &grant.access_token,
                    state.config.access_token_ttl(),
                    state.config.cookie_options(),
                );
                append_set_cookie(&mut response, &cookie);
            }

            // Activity is recorded after the handler, and only for requests
            // that actually succeeded.
            if response.status().is_success() {
                if let Err(err) = state.sessions.update_session_activity(auth.session_id).await {
                    tracing::warn!(
                        error = %err,
                        session_id = %auth.session_id,
                        "failed to record session activity"
                    );
                }
            }
            response
        }
        Err(denial) => denial_response(&state, denial),
    }
}

async fn admit(
    state: &AppState,
    access_token: Option<String>,
    refresh_token: Option<String>,
) -> Result<Admission, Denial> {
    if let Some(token) = access_token.as_deref() {
        match state.codec.verify(token) {
            Ok(claims) if claims.is_refresh() => {
                // A refresh token cannot stand in for an access token.
                tracing::debug!("refresh-typed token presented as access token");
            }
            Ok(claims) => {
                let valid = state
                    .sessions
                    .validate_session(claims.sid)
                    .await
                    .map_err(|err| Denial::Error(err.into()))?;
                if !valid {
                    return Err(Denial::SessionInvalid);
                }
                let user = load_active_user(state, claims.sub).await?;
                return Ok(Admission {
                    user,
                    auth: AuthSession {
                        user_id: claims.sub,
                        session_id: claims.sid,
                    },
                    refreshed: None,
                });
            }
            Err(err) => {
                tracing::debug!(error = %err, "access token rejected");
            }
        }
    }

    // Transparent rotation: no usable access token, try the refresh token.
    let Some(refresh_token) = refresh_token else {
        return Err(Denial::Unauthenticated);
    };
    let grant = state
        .sessions
        .refresh_session(&refresh_token)
        .await
        .map_err(|err| Denial::Error(err.into()))?
        .ok_or(Denial::RefreshFailed)?;

    let user = load_active_user(state, grant.user_id).await?;
    Ok(Admission {
        user,
        auth: AuthSession {
            user_id: grant.user_id,
            session_id: grant.session_id,
        },
        refreshed: Some(grant),
    })
}

async fn load_active_user(state: &AppState, user_id: UserId) -> Result<User, Denial> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(|err| Denial::Error(err.into()))?;
    match user {
        Some(user) if user.is_active => Ok(user),
        _ => Err(Denial::SessionInvalid),
    }
}

fn denial_response(state: &AppState, denial: Denial) -> Response {
    match denial {
        Denial::Unauthenticated => {
            AppError::Unauthorized("Authentication required".to_string()).into_response()
        }
        Denial::SessionInvalid => {
            AppError::Unauthorized("Session expired".to_string()).into_response()
        }
        Denial::RefreshFailed => {
            let options = state.config.cookie_options();
            let mut response =
                AppError::Unauthorized("Session expired".to_string()).into_response();
            append_set_cookie(&mut response, &build_clear_cookie(ACCESS_COOKIE_NAME, options));
            append_set_cookie(&mut response, &build_clear_cookie(REFRESH_COOKIE_NAME, options));
            response
        }
        Denial::Error(err) => err.into_response(),
    }
}

fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(header::COOKIE)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| extract_cookie_value(raw, ACCESS_COOKIE_NAME))
        })
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest);
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim_start());
        }
    }
    None
}

fn append_set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_token_accepts_case_variants() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("BEARER abc"), Some("abc"));
        assert_eq!(parse_bearer_token("Basic abc"), None);
        assert_eq!(parse_bearer_token("abc"), None);
    }
}
