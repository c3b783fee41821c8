//! Configuration and fingerprint stores.
//!
//! YAML config with typed accessors, plus the client fingerprint file that
//! the update watcher mutates in place when a new desktop build ships.

pub mod fingerprint;
pub mod loader;
pub mod schema;

pub use {
    fingerprint::{Fingerprint, FingerprintStore},
    loader::{config_dir, discover_and_load, load_config, save_config},
    schema::{
        ApiConfig, AuthConfig, CourierConfig, ModelConfig, ReasoningEffort, RotationStrategy,
        ServerConfig, SessionConfig, TlsTransportKind, TransportConfig, UpdateConfig,
    },
};
