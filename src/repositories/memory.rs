//! In-memory reference implementation of the store traits.
//!
//! Backs the deterministic tests and works as a storage-free backend for
//! single-process deployments. Locking discipline: guards are never held
//! across an await point.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Device, DeviceWithSessions, NewSession, Session, User};
use crate::types::{DeviceId, SessionId, UserId};

use super::store::{SessionStore, StoreError, UserStore};

#[derive(Debug, Default)]
struct SessionStoreState {
    devices: HashMap<DeviceId, Device>,
    sessions: HashMap<SessionId, Session>,
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<SessionStoreState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionStoreState> {
        self.inner.read().expect("session store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionStoreState> {
        self.inner.write().expect("session store lock poisoned")
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_device_by_fingerprint(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        active_only: bool,
    ) -> Result<Option<Device>, StoreError> {
        let state = self.read();
        let device = state
            .devices
            .values()
            .find(|device| {
                device.user_id == user_id
                    && device.user_agent == user_agent
                    && device.ip_address == ip_address
                    && (!active_only || device.is_active)
            })
            .cloned();
        Ok(device)
    }

    async fn create_device(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Device, StoreError> {
        let device = Device {
            id: DeviceId::new(),
            user_id,
            user_agent: user_agent.to_string(),
            ip_address: ip_address.to_string(),
            is_active: true,
            created_at,
        };
        self.write().devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn find_active_session_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.read();
        let session = state
            .sessions
            .values()
            .find(|session| session.device_id == device_id && session.is_active)
            .cloned();
        Ok(session)
    }

    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError> {
        let session = Session {
            id: SessionId::new(),
            user_id: new_session.user_id,
            device_id: new_session.device_id,
            refresh_token: None,
            refresh_token_expires_at: new_session.refresh_token_expires_at,
            last_activity_at: new_session.last_activity_at,
            is_active: true,
            created_at: new_session.created_at,
        };
        self.write().sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session_by_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self.read().sessions.get(&session_id).cloned())
    }

    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.read();
        let session = state
            .sessions
            .values()
            .find(|session| session.refresh_token.as_deref() == Some(refresh_token))
            .cloned();
        Ok(session)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn deactivate_sessions_for_user(
        &self,
        user_id: UserId,
        except_session_id: Option<SessionId>,
    ) -> Result<u64, StoreError> {
        let mut state = self.write();
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.user_id == user_id
                && session.is_active
                && except_session_id != Some(session.id)
            {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn deactivate_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.write();
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.is_active && session.last_activity_at < cutoff {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_active_devices_for_user(
        &self,
        user_id: UserId,
        with_sessions: bool,
    ) -> Result<Vec<DeviceWithSessions>, StoreError> {
        let state = self.read();
        let mut devices: Vec<Device> = state
            .devices
            .values()
            .filter(|device| device.user_id == user_id && device.is_active)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let records = devices
            .into_iter()
            .map(|device| {
                let sessions = if with_sessions {
                    state
                        .sessions
                        .values()
                        .filter(|session| session.device_id == device.id)
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };
                DeviceWithSessions { device, sessions }
            })
            .collect();
        Ok(records)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().expect("user store lock poisoned");
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().expect("user store lock poisoned");
        Ok(users.get(&user_id).cloned())
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().expect("user store lock poisoned");
        users.insert(user.id, user.clone());
        Ok(())
    }
}
