//! Best-effort JWT payload decoding.
//!
//! Only the claims are read; signatures are never verified. The upstream is
//! the sole authority on token validity — this exists for expiry scheduling
//! and account identity, nothing more.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};

const AUTH_CLAIM: &str = "https://api.openai.com/auth";
const PROFILE_CLAIM: &str = "https://api.openai.com/profile";

/// Claims courier cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    /// Unix expiry, seconds.
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub account_id: Option<String>,
    pub plan_type: Option<String>,
}

/// Decode the payload segment of a JWT into raw JSON claims.
pub fn parse_claims(token: &str) -> Option<serde_json::Value> {
    let payload_b64 = token.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).or_else(|_| {
        let padded = match payload_b64.len() % 4 {
            2 => format!("{payload_b64}=="),
            3 => format!("{payload_b64}="),
            _ => payload_b64.to_string(),
        };
        STANDARD.decode(padded)
    });
    serde_json::from_slice(&payload.ok()?).ok()
}

/// Decode the claims courier uses. Returns `None` when the token is not a
/// parseable JWT at all.
pub fn decode(token: &str) -> Option<TokenClaims> {
    let claims = parse_claims(token)?;
    Some(TokenClaims {
        exp: claims.get("exp").and_then(serde_json::Value::as_u64),
        email: nonempty_str(claims.get("email"))
            .or_else(|| nonempty_str(claims.get(PROFILE_CLAIM).and_then(|p| p.get("email")))),
        account_id: extract_account_id(&claims),
        plan_type: nonempty_str(
            claims
                .get(AUTH_CLAIM)
                .and_then(|auth| auth.get("chatgpt_plan_type")),
        ),
    })
}

/// ChatGPT account id, checked in the order the claim has moved over time.
fn extract_account_id(claims: &serde_json::Value) -> Option<String> {
    nonempty_str(claims.get("chatgpt_account_id"))
        .or_else(|| {
            nonempty_str(
                claims
                    .get(AUTH_CLAIM)
                    .and_then(|auth| auth.get("chatgpt_account_id")),
            )
        })
        .or_else(|| {
            nonempty_str(
                claims
                    .get("organizations")
                    .and_then(serde_json::Value::as_array)
                    .and_then(|arr| arr.first())
                    .and_then(|org| org.get("id")),
            )
        })
}

fn nonempty_str(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Whether the token's `exp` is in the past. Tokens without a parseable
/// expiry are treated as non-expired; the upstream will reject them if not.
pub fn is_expired(token: &str, now: u64) -> bool {
    decode(token)
        .and_then(|c| c.exp)
        .is_some_and(|exp| exp <= now)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_codex_shaped_claims() {
        let token = make_jwt(&serde_json::json!({
            "exp": 1_900_000_000u64,
            "https://api.openai.com/auth": {
                "chatgpt_account_id": "acct-abc",
                "chatgpt_plan_type": "pro"
            },
            "https://api.openai.com/profile": { "email": "dev@example.com" }
        }));
        let claims = decode(&token).unwrap();
        assert_eq!(claims.exp, Some(1_900_000_000));
        assert_eq!(claims.account_id.as_deref(), Some("acct-abc"));
        assert_eq!(claims.plan_type.as_deref(), Some("pro"));
        assert_eq!(claims.email.as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn account_id_falls_back_to_organizations() {
        let token = make_jwt(&serde_json::json!({
            "organizations": [{"id": "org-1"}]
        }));
        assert_eq!(decode(&token).unwrap().account_id.as_deref(), Some("org-1"));
    }

    #[test]
    fn top_level_account_id_wins() {
        let token = make_jwt(&serde_json::json!({
            "chatgpt_account_id": "top",
            "https://api.openai.com/auth": { "chatgpt_account_id": "nested" }
        }));
        assert_eq!(decode(&token).unwrap().account_id.as_deref(), Some("top"));
    }

    #[test]
    fn expiry_check() {
        let token = make_jwt(&serde_json::json!({"exp": 100u64}));
        assert!(is_expired(&token, 100));
        assert!(is_expired(&token, 101));
        assert!(!is_expired(&token, 99));
    }

    #[test]
    fn garbage_is_not_a_token() {
        assert!(decode("not-a-jwt").is_none());
        assert!(!is_expired("not-a-jwt", u64::MAX));
    }

    #[test]
    fn standard_base64_payload_is_accepted() {
        // Some tooling emits padded standard base64 in the payload segment.
        let payload = STANDARD.encode(br#"{"exp": 42}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(decode(&token).unwrap().exp, Some(42));
    }
}
