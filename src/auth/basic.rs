//! HTTP Basic credential handling.
//!
//! Accounts carry a derived digest rather than a raw password: both halves of
//! the credential pair are SHA-256 hashed, hex-encoded, concatenated, and
//! hashed again.  Verification recomputes that digest from the presented
//! `Authorization: Basic` pair and compares it to the directory record.

use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq as _;

/// Credentials presented in an `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Parse an `Authorization` header value into Basic credentials.
///
/// Every malformation returns `None`: wrong scheme, missing or extra parts,
/// invalid base64, non-UTF-8 payload, missing colon, empty username or
/// password.  Callers fold all of these into the same authentication
/// challenge, so probing cannot distinguish failure modes.
pub fn parse_basic(header: &str) -> Option<BasicCredentials> {
    let mut parts = header.split_whitespace();
    let scheme = parts.next()?;
    let payload = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() || password.is_empty() {
        return None;
    }

    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Digest the directory stores for an account:
/// `sha256( hex(sha256(username)) || hex(sha256(password)) )`, lowercase hex.
pub fn credential_digest(username: &str, password: &str) -> String {
    let inner = format!("{}{}", sha256_hex(username), sha256_hex(password));
    sha256_hex(&inner)
}

/// True if the presented pair matches the stored digest. Constant-time
/// comparison, so response timing does not rank near-miss digests.
pub fn verify(credentials: &BasicCredentials, stored_digest: &str) -> bool {
    let computed = credential_digest(&credentials.username, &credentials.password);
    let stored = stored_digest.to_ascii_lowercase();
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_basic(pair: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(pair)
        )
    }

    // ── Parsing ─────────────────────────────────────────────────────────

    #[test]
    fn parses_wellformed_header() {
        let creds = parse_basic(&encode_basic("alice:secret")).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let payload = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        assert!(parse_basic(&format!("basic {payload}")).is_some());
        assert!(parse_basic(&format!("BASIC {payload}")).is_some());
    }

    #[test]
    fn password_may_contain_colons() {
        let creds = parse_basic(&encode_basic("alice:se:cr:et")).unwrap();
        assert_eq!(creds.password, "se:cr:et");
    }

    #[test]
    fn rejects_wrong_scheme() {
        let payload = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        assert!(parse_basic(&format!("Bearer {payload}")).is_none());
    }

    #[test]
    fn rejects_wrong_part_count() {
        assert!(parse_basic("Basic").is_none());
        assert!(parse_basic("Basic abc def").is_none());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(parse_basic("Basic !!!not-base64!!!").is_none());
    }

    #[test]
    fn rejects_non_utf8_payload() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0x3a, 0x61]);
        assert!(parse_basic(&format!("Basic {payload}")).is_none());
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse_basic(&encode_basic("alicesecret")).is_none());
    }

    #[test]
    fn rejects_empty_username_or_password() {
        assert!(parse_basic(&encode_basic(":secret")).is_none());
        assert!(parse_basic(&encode_basic("alice:")).is_none());
    }

    // ── Digest ──────────────────────────────────────────────────────────

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let digest = credential_digest("alice", "secret");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_is_not_a_single_round() {
        // The stored digest must depend on the per-half inner hashes, not on
        // a plain hash of the concatenated pair.
        let digest = credential_digest("alice", "secret");
        assert_ne!(digest, sha256_hex("alicesecret"));
        assert_ne!(digest, sha256_hex("alice:secret"));
    }

    #[test]
    fn digest_separates_username_from_password() {
        assert_ne!(credential_digest("ab", "c"), credential_digest("a", "bc"));
    }

    #[test]
    fn verify_roundtrip_and_mismatch() {
        let stored = credential_digest("alice", "secret");
        let good = BasicCredentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        let bad = BasicCredentials {
            username: "alice".to_string(),
            password: "wrong".to_string(),
        };
        assert!(verify(&good, &stored));
        assert!(verify(&good, &stored.to_ascii_uppercase()));
        assert!(!verify(&bad, &stored));
    }

    #[test]
    fn verify_rejects_a_stored_digest_of_the_wrong_length() {
        let stored = credential_digest("alice", "secret");
        let good = BasicCredentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        assert!(!verify(&good, &stored[..32]));
        assert!(!verify(&good, ""));
    }
}
