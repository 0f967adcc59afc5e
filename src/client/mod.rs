//! Browser-side auth coordinator.
//!
//! Tracks whether the current page has a signed-in user, revalidates on
//! focus, drives login and logout navigation, and keeps tabs in step through
//! an advisory broadcast channel. Platform access goes through the
//! [`SessionApi`] and [`Browser`] traits.
//!
//! ```rust,ignore
//! use storefront_auth::client::{AuthChannel, AuthCoordinator, HttpSessionApi};
//!
//! let channel = AuthChannel::new();
//! let auth = AuthCoordinator::new(HttpSessionApi::new(app_url)?, browser)
//!     .with_channel(channel.clone());
//! auth.mount().await;
//!
//! let mut changes = auth.subscribe();
//! while changes.changed().await.is_ok() {
//!     render(&changes.borrow());
//! }
//! ```

mod api;
mod browser;
mod channel;
mod coordinator;

pub use api::{HttpSessionApi, LogoutOutcome, SessionApi, SessionCheck};
pub use browser::{AUTH_FLAG_COOKIE, Browser, has_auth_flag};
pub use channel::{AuthChannel, AuthEvent, AuthMessage};
pub use coordinator::{AuthCoordinator, AuthSnapshot, AuthStatus};
