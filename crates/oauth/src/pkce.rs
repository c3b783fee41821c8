//! PKCE verifier/challenge generation (RFC 7636).

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::Rng,
    sha2::{Digest, Sha256},
};

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Maximum verifier length allowed by RFC 7636.
const VERIFIER_MAX_LEN: usize = 128;

/// Generate a verifier from 32 random bytes, base64url-encoded and filtered
/// to the PKCE unreserved alphabet, with its S256 challenge.
pub fn generate_pkce() -> PkceChallenge {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);

    let verifier: String = URL_SAFE_NO_PAD
        .encode(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        .take(VERIFIER_MAX_LEN)
        .collect();

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Random opaque `state` parameter.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
