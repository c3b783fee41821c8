//! Fingerprint header builder.
//!
//! Single source of truth for every header the gateway sends upstream. The
//! desktop client emits its headers in a fixed order, and the anti-bot layer
//! has been observed to care, so the configured order is enforced before a
//! request leaves the process.

use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::Deserialize;

use courier_config::Fingerprint;

/// Originator tag attached to authenticated upstream calls.
pub const ORIGINATOR: &str = "codex_cli_rs";

/// Per-call knobs for [`HeaderBuilder::authenticated`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Add `Content-Type: application/json`.
    pub json_body: bool,
    /// Add `Accept: text/event-stream`.
    pub sse: bool,
    pub cookie: Option<String>,
}

impl CallOptions {
    pub fn streaming_json() -> Self {
        Self {
            json_body: true,
            sse: true,
            cookie: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    fingerprint: Fingerprint,
}

impl HeaderBuilder {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self { fingerprint }
    }

    /// The filled user-agent template.
    pub fn user_agent(&self) -> String {
        self.fingerprint
            .user_agent_template
            .replace("{version}", &self.fingerprint.app_version)
            .replace("{platform}", platform())
            .replace("{arch}", arch())
    }

    /// Dynamic `sec-ch-ua` brand list for the fingerprinted Chromium major.
    pub fn sec_ch_ua(&self) -> String {
        let major = self.fingerprint.chromium_major();
        format!(
            "\"Chromium\";v=\"{major}\", \"Google Chrome\";v=\"{major}\", \"Not.A/Brand\";v=\"99\""
        )
    }

    /// Headers for an authenticated upstream call.
    ///
    /// The account id falls back to the JWT claim when the caller does not
    /// supply one.
    pub fn authenticated(
        &self,
        token: &str,
        account_id: Option<&str>,
        opts: &CallOptions,
    ) -> Vec<(String, String)> {
        let mut headers = self.base_headers();
        headers.push(("authorization".into(), format!("Bearer {token}")));

        let account_id = account_id
            .map(ToString::to_string)
            .or_else(|| account_id_from_token(token));
        if let Some(id) = account_id {
            headers.push(("chatgpt-account-id".into(), id));
        }
        headers.push(("originator".into(), ORIGINATOR.into()));

        if opts.json_body {
            headers.push(("content-type".into(), "application/json".into()));
        }
        if opts.sse {
            headers.push(("accept".into(), "text/event-stream".into()));
        }
        if let Some(cookie) = &opts.cookie {
            headers.push(("cookie".into(), cookie.clone()));
        }

        self.ordered(headers)
    }

    /// Credential-free headers for appcast and OAuth calls.
    pub fn anonymous(&self) -> Vec<(String, String)> {
        self.ordered(self.base_headers())
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("user-agent".into(), self.user_agent()),
            ("sec-ch-ua".into(), self.sec_ch_ua()),
            ("sec-ch-ua-mobile".into(), "?0".into()),
            (
                "sec-ch-ua-platform".into(),
                format!("\"{}\"", ch_platform()),
            ),
        ];
        for (name, value) in &self.fingerprint.default_headers {
            headers.push((name.clone(), value.clone()));
        }
        headers
    }

    /// Reorder to the configured header order; unknown keys keep their
    /// relative position after the known ones; duplicates collapse to the
    /// first occurrence.
    fn ordered(&self, headers: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut remaining: Vec<(String, String)> = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            if !remaining.iter().any(|(n, _)| *n == lower) {
                remaining.push((lower, value));
            }
        }

        let mut ordered = Vec::with_capacity(remaining.len());
        for wanted in &self.fingerprint.header_order {
            let wanted = wanted.to_ascii_lowercase();
            if let Some(pos) = remaining.iter().position(|(n, _)| *n == wanted) {
                ordered.push(remaining.remove(pos));
            }
        }
        ordered.extend(remaining);
        ordered
    }
}

/// ChatGPT account id claim, namespaced under the OpenAI auth claim.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(rename = "https://api.openai.com/auth")]
    openai_auth: Option<OpenAiAuthClaims>,
}

#[derive(Debug, Deserialize)]
struct OpenAiAuthClaims {
    #[serde(default)]
    chatgpt_account_id: Option<String>,
}

fn account_id_from_token(token: &str) -> Option<String> {
    let payload_segment = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .or_else(|_| URL_SAFE.decode(payload_segment))
        .ok()?;
    let claims = serde_json::from_slice::<TokenClaims>(&decoded).ok()?;
    claims
        .openai_auth
        .and_then(|auth| auth.chatgpt_account_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "Macintosh"
    } else if cfg!(target_os = "windows") {
        "Windows NT 10.0"
    } else {
        "X11; Linux"
    }
}

fn arch() -> &'static str {
    if cfg!(target_os = "macos") {
        "Intel Mac OS X 10_15_7"
    } else if cfg!(target_os = "windows") {
        "Win64; x64"
    } else {
        "x86_64"
    }
}

fn ch_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macOS"
    } else if cfg!(target_os = "windows") {
        "Windows"
    } else {
        "Linux"
    }
}
