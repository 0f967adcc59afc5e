use std::sync::Arc;

use super::config::{AuthConfig, AuthSettings};
use super::store::{PkceStateStore, SessionStore};
use crate::backend::BackendClient;
use crate::oauth::AuthClient;

/// Shared state for auth route handlers.
#[derive(Clone)]
pub(super) struct AuthState {
    pub(super) client: Arc<AuthClient>,
    pub(super) backend: Arc<BackendClient>,
    pub(super) pkce: PkceStateStore,
    pub(super) sessions: SessionStore,
    pub(super) settings: AuthSettings,
}

impl AuthState {
    pub(super) fn new(config: AuthConfig) -> Self {
        let secure = config.settings.secure_cookies;
        Self {
            client: Arc::new(config.client),
            backend: Arc::new(config.backend),
            pkce: PkceStateStore::new(&config.secret, config.settings.pkce_max_age, secure),
            sessions: SessionStore::new(&config.secret, config.settings.refresh_threshold, secure),
            settings: config.settings,
        }
    }
}

