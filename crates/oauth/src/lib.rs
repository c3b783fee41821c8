//! OAuth 2.0 authorization-code (PKCE) and device flows against the upstream
//! identity provider, plus the ephemeral local callback listener.

pub mod callback;
pub mod device;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod pending;
pub mod types;

pub use {
    callback::CallbackServer,
    device::DeviceCodeResponse,
    error::{Error, Result},
    flow::OAuthFlow,
    pending::{PendingAuth, PendingAuthStore},
    pkce::{PkceChallenge, generate_pkce, generate_state},
    types::{OAuthConfig, TokenSet},
};
