//! Config schema types (server, api, auth, tls, session, model, update).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub tls: TransportConfig,
    pub session: SessionConfig,
    pub model: ModelConfig,
    pub update: UpdateConfig,
    /// Directory holding accounts.json, cookies.json and update-state.json.
    pub data_dir: String,
}

impl CourierConfig {
    pub fn data_path(&self, file: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(file)
    }
}

/// Listener configuration for the local gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// When set, compatibility endpoints require this key from clients.
    pub proxy_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            proxy_api_key: None,
        }
    }
}

/// Upstream Responses backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Overall timeout for a streaming upstream call.
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chatgpt.com/backend-api".into(),
            timeout_seconds: 600,
        }
    }
}

/// How the pool picks the next account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    LeastUsed,
    RoundRobin,
}

/// Account/auth configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub rotation_strategy: RotationStrategy,
    /// Refresh an account's token this many seconds before its JWT expires.
    pub refresh_margin_seconds: u64,
    /// Base backoff applied when the upstream rate-limits an account and
    /// sends no retry-after hint.
    pub rate_limit_backoff_seconds: u64,
    pub oauth_client_id: String,
    pub oauth_auth_endpoint: String,
    pub oauth_token_endpoint: String,
    /// Fixed local port for the OAuth callback listener.
    pub oauth_callback_port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            rotation_strategy: RotationStrategy::default(),
            refresh_margin_seconds: 300,
            rate_limit_backoff_seconds: 60,
            oauth_client_id: "app_EMoamEEZ73f0CkXaXp7hrann".into(),
            oauth_auth_endpoint: "https://auth.openai.com/oauth/authorize".into(),
            oauth_token_endpoint: "https://auth.openai.com/oauth/token".into(),
            oauth_callback_port: 1455,
        }
    }
}

/// Which TLS transport implementation to use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TlsTransportKind {
    /// Prefer the in-process FFI library when present, else the subprocess.
    #[default]
    Auto,
    Cli,
    Ffi,
}

/// Impersonating transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub transport: TlsTransportKind,
    /// Single-switch impersonation profile understood by the curl fork.
    pub impersonate_profile: String,
    /// Outbound proxy. `HTTP_PROXY`/`HTTPS_PROXY` are honored when unset.
    pub proxy_url: Option<String>,
    /// Override for the impersonating curl binary (CLI transport).
    pub cli_binary: Option<String>,
    /// Override for the impersonating libcurl shared library (FFI transport).
    pub library_path: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: TlsTransportKind::default(),
            impersonate_profile: "chrome136".into(),
            proxy_url: None,
            cli_binary: None,
            library_path: None,
        }
    }
}

/// Multi-turn session cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_minutes: u64,
    pub cleanup_interval_minutes: u64,
    pub max_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            cleanup_interval_minutes: 5,
            max_entries: 1000,
        }
    }
}

/// Reasoning effort levels accepted by the Responses backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }
}

/// Model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub default: String,
    pub default_reasoning_effort: ReasoningEffort,
    /// Harvested desktop context prompt; a built-in fallback is used when
    /// the file is absent.
    pub context_prompt_path: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: "gpt-5-codex".into(),
            default_reasoning_effort: ReasoningEffort::Medium,
            context_prompt_path: None,
        }
    }
}

/// Appcast / fingerprint update watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub appcast_url: String,
    pub check_interval_minutes: u64,
    /// Client fingerprint YAML mutated when a new desktop build ships.
    pub fingerprint_path: String,
    /// External extractor run against a fresh client download; optional.
    pub harvester_path: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            appcast_url: "https://persistent.oaistatic.com/sidekick/appcast.xml".into(),
            check_interval_minutes: 30,
            fingerprint_path: "fingerprint.yaml".into(),
            harvester_path: None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CourierConfig::default();
        assert_eq!(cfg.server.port, 8787);
        assert_eq!(cfg.auth.rotation_strategy, RotationStrategy::LeastUsed);
        assert_eq!(cfg.tls.transport, TlsTransportKind::Auto);
        assert_eq!(cfg.model.default_reasoning_effort, ReasoningEffort::Medium);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: CourierConfig = serde_yaml::from_str("server:\n  port: 9000\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.api.timeout_seconds, 600);
    }

    #[test]
    fn rotation_strategy_snake_case() {
        let cfg: CourierConfig =
            serde_yaml::from_str("auth:\n  rotation_strategy: round_robin\n").unwrap();
        assert_eq!(cfg.auth.rotation_strategy, RotationStrategy::RoundRobin);
    }

    #[test]
    fn effort_ordering_matches_escalation() {
        assert!(ReasoningEffort::Low < ReasoningEffort::Medium);
        assert!(ReasoningEffort::High < ReasoningEffort::Xhigh);
    }
}
