//! The session lifecycle engine.
//!
//! Sessions bind a user to a device fingerprint and move between two states:
//! active and inactive. Deactivation is soft and comes from three places --
//! supersession by a newer login on the same device, idle timeout (lazy on
//! validate, eager from the sweeper), and explicit logout. An inactive
//! session can be reactivated through its refresh token until the token's
//! absolute expiry; that is what makes a login survive short idle windows.

use std::sync::Arc;

use chrono::Duration;

use crate::models::{DeviceView, IssuedTokens, NewSession, RefreshedAccess, Session, User};
use crate::repositories::{SessionStore, StoreError};
use crate::types::{SessionId, UserId};
use crate::utils::jwt::{TokenCodec, REFRESH_TOKEN_TYPE};
use crate::utils::time::Clock;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to issue token: {0}")]
    Token(#[source] anyhow::Error),
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    /// Access-token lifetime; doubles as the idle window for sessions.
    access_ttl: Duration,
    /// Absolute refresh-token lifetime.
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Opens a session for a freshly authenticated user.
    ///
    /// The device is resolved by its (user, user-agent, IP) fingerprint and
    /// created on first sight. A device holds at most one live session: an
    /// existing active session on the device is superseded, not kept
    /// alongside. The refresh token is persisted on the session row so it
    /// can be revoked independently of its signature.
    pub async fn create_session(
        &self,
        user: &User,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<IssuedTokens, SessionError> {
        let now = self.clock.now();

        let device = match self
            .store
            .find_device_by_fingerprint(user.id, user_agent, ip_address, true)
            .await?
        {
            Some(device) => device,
            None => {
                self.store
                    .create_device(user.id, user_agent, ip_address, now)
                    .await?
            }
        };

        if let Some(mut existing) = self.store.find_active_session_for_device(device.id).await? {
            existing.is_active = false;
            self.store.save_session(&existing).await?;
            tracing::debug!(
                session_id = %existing.id,
                device_id = %device.id,
                "superseded previous session on device"
            );
        }

        let refresh_token_expires_at = now + self.refresh_ttl;
        let mut session = self
            .store
            .create_session(NewSession {
                user_id: user.id,
                device_id: device.id,
                refresh_token_expires_at,
                last_activity_at: now,
                created_at: now,
            })
            .await?;

        let access_token = self
            .codec
            .issue(user.id, session.id, None, self.access_ttl, now)
            .map_err(SessionError::Token)?;
        let refresh_token = self
            .codec
            .issue(
                user.id,
                session.id,
                Some(REFRESH_TOKEN_TYPE),
                self.refresh_ttl,
                now,
            )
            .map_err(SessionError::Token)?;

        // A session without its refresh token bound cannot be refreshed.
        session.refresh_token = Some(refresh_token.clone());
        self.store.save_session(&session).await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "session created");

        Ok(IssuedTokens {
            access_token,
            access_token_expires_at: now + self.access_ttl,
            refresh_token,
            refresh_token_expires_at,
        })
    }

    /// Whether a session may admit a request right now.
    ///
    /// Fails closed on missing or inactive sessions. A session idle for
    /// longer than the access-token ttl is deactivated here as a side
    /// effect (the lazy half of idle expiry; the sweeper is the eager half).
    /// Activity is NOT recorded here -- that is an explicit separate step.
    pub async fn validate_session(&self, session_id: SessionId) -> Result<bool, SessionError> {
        let Some(mut session) = self.store.find_session_by_id(session_id).await? else {
            return Ok(false);
        };
        if !session.is_active {
            return Ok(false);
        }

        let idle = self.clock.now() - session.last_activity_at;
        if idle > self.access_ttl {
            session.is_active = false;
            self.store.save_session(&session).await?;
            tracing::debug!(%session_id, idle_secs = idle.num_seconds(), "session idled out");
            return Ok(false);
        }

        Ok(true)
    }

    /// Bumps a session's last-activity timestamp. No-op when the session is
    /// missing or inactive.
    pub async fn update_session_activity(&self, session_id: SessionId) -> Result<(), SessionError> {
        if let Some(mut session) = self.store.find_session_by_id(session_id).await? {
            if session.is_active {
                session.last_activity_at = self.clock.now();
                self.store.save_session(&session).await?;
            }
        }
        Ok(())
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// Denied (None) when the token fails verification, is not
    /// refresh-typed, does not match the value stored on its session, or the
    /// session's absolute refresh expiry has passed. An inactive session
    /// inside the expiry window is reactivated: the refresh token represents
    /// "remember this login", independent of the short idle timeout. The
    /// refresh token itself is not rotated.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshedAccess>, SessionError> {
        let claims = match self.codec.verify(refresh_token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "refresh token rejected");
                return Ok(None);
            }
        };
        if !claims.is_refresh() {
            return Ok(None);
        }

        let Some(mut session) = self.store.find_session_by_refresh_token(refresh_token).await?
        else {
            return Ok(None);
        };
        // The stored token value must belong to the session the claims name.
        if session.id != claims.sid {
            return Ok(None);
        }

        let now = self.clock.now();
        if session.refresh_token_expires_at < now {
            tracing::debug!(session_id = %session.id, "refresh denied: absolute expiry passed");
            return Ok(None);
        }

        if !session.is_active {
            session.is_active = true;
            tracing::info!(session_id = %session.id, "session reactivated via refresh token");
        }
        session.last_activity_at = now;
        self.store.save_session(&session).await?;

        let access_token = self
            .codec
            .issue(session.user_id, session.id, None, self.access_ttl, now)
            .map_err(SessionError::Token)?;

        Ok(Some(RefreshedAccess {
            access_token,
            access_token_expires_at: now + self.access_ttl,
            user_id: session.user_id,
            session_id: session.id,
        }))
    }

    /// Unconditional active -> inactive transition. Idempotent.
    pub async fn deactivate_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        if let Some(mut session) = self.store.find_session_by_id(session_id).await? {
            session.is_active = false;
            self.store.save_session(&session).await?;
            tracing::info!(%session_id, "session deactivated");
        }
        Ok(())
    }

    /// Deactivates every active session of a user, optionally sparing one
    /// ("log out all other devices"). Returns the number affected.
    pub async fn deactivate_all_user_sessions(
        &self,
        user_id: UserId,
        except_session_id: Option<SessionId>,
    ) -> Result<u64, SessionError> {
        let count = self
            .store
            .deactivate_sessions_for_user(user_id, except_session_id)
            .await?;
        if count > 0 {
            tracing::info!(%user_id, count, "deactivated user sessions");
        }
        Ok(count)
    }

    /// Read-only projection of a user's active devices: per device, the
    /// active-session count and the most recent activity (falling back to
    /// the device's creation time when no session is active).
    pub async fn list_user_devices(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DeviceView>, SessionError> {
        let records = self
            .store
            .list_active_devices_for_user(user_id, true)
            .await?;

        let views = records
            .into_iter()
            .map(|record| {
                let active: Vec<&Session> = record
                    .sessions
                    .iter()
                    .filter(|session| session.is_active)
                    .collect();
                let last_activity_at = active
                    .iter()
                    .map(|session| session.last_activity_at)
                    .max()
                    .unwrap_or(record.device.created_at);
                DeviceView {
                    id: record.device.id,
                    user_agent: record.device.user_agent,
                    ip_address: record.device.ip_address,
                    last_activity_at,
                    active_sessions: active.len(),
                }
            })
            .collect();
        Ok(views)
    }

    /// Bulk-deactivates sessions whose activity predates the idle window.
    /// The sweeper's entry point; also reachable from the cleanup binary.
    pub async fn deactivate_stale_sessions(&self) -> Result<u64, SessionError> {
        let cutoff = self.clock.now() - self.access_ttl;
        let count = self.store.deactivate_stale_sessions(cutoff).await?;
        if count > 0 {
            tracing::info!(count, "deactivated stale sessions");
        }
        Ok(count)
    }
}
