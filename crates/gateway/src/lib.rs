//! The HTTP gateway: compatibility endpoints, account management, and the
//! background update watcher, wired over the shared application state.

pub mod anthropic_routes;
pub mod auth_routes;
pub mod chat;
pub mod error;
pub mod gemini_routes;
pub mod openai_routes;
pub mod server;
pub mod state;
pub mod update;
pub mod web;

pub use {
    server::{build_router, serve},
    state::{AppState, SharedState},
};
