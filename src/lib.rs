#![doc = include_str!("../README.md")]

pub mod backend;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod pkce;
pub mod redirect;
pub mod token;
pub mod types;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "middleware")]
pub mod middleware;

// Re-exports for convenient access
pub use backend::BackendClient;
pub use error::Error;
pub use oauth::{
    AuthClient, AuthorizationHints, AuthorizationParams, AuthorizationRequest, OAuthConfig,
    build_authorization_url,
};
pub use pkce::{PkceChallenge, generate_challenge, generate_code_challenge, generate_code_verifier};
pub use redirect::validate_callback_url;
pub use token::{TokenSet, normalize_token_response};
pub use types::{PkceState, Session, SessionSource, SessionUpdate, SessionUser};
