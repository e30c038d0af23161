use std::sync::Arc;

use crate::config::Config;
use crate::repositories::UserStore;
use crate::services::SessionManager;
use crate::utils::jwt::TokenCodec;

/// Shared application state handed to handlers and middleware.
///
/// Everything is constructor-passed so the whole stack can be assembled over
/// in-memory stores in tests.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub users: Arc<dyn UserStore>,
    pub codec: TokenCodec,
    pub config: Config,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        users: Arc<dyn UserStore>,
        codec: TokenCodec,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            users,
            codec,
            config,
        }
    }
}
