//! Storefront authentication middleware for Axum.
//!
//! Mounts the browser-facing auth endpoints and keeps all session state in
//! two encrypted cookies, so any instance sharing the secret can serve any
//! request.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use storefront_auth::middleware::{AuthConfig, AuthUser, auth_routes};
//!
//! // 1. Configure from environment
//! let config = AuthConfig::from_env()?;
//!
//! // 2. Keep a session store for your own protected routes
//! let sessions = config.session_store();
//!
//! // 3. Mount auth routes
//! let app = axum::Router::new()
//!     .route("/api/orders", get(list_orders))
//!     .with_state(sessions)
//!     .merge(auth_routes(config));
//!
//! // 4. Extract the user in handlers
//! async fn list_orders(user: AuthUser) -> impl IntoResponse { /* ... */ }
//! ```

mod config;
mod cookies;
mod csrf;
mod error;
mod extractor;
mod routes;
mod state;
mod store;

pub use config::{AuthConfig, MIN_SECRET_LEN, SessionSecret};
pub use csrf::{CSRF_HEADER, is_valid_origin};
pub use error::{AuthError, ErrorCode};
pub use extractor::AuthUser;
pub use routes::{LOGOUT_BROADCAST, auth_routes};
pub use store::{PkceStateStore, SessionStore, should_refresh_session};
