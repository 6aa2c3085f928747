//! Optional shared-secret gate. Constant-time comparison via `sha2`+`subtle`,
//! carried over from the reference crate's `AuthConfig::validate`, simplified to
//! Bearer-only since the gateway's auth non-goal excludes Basic auth and IP allowlists.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Validates an `Authorization` header value against a configured shared secret.
/// Hashes both sides before comparing so the comparison itself runs in constant time
/// regardless of where the strings first diverge.
pub fn validate_bearer(header_value: Option<&str>, secret: &str) -> bool {
    let presented = match header_value.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return false,
    };

    let presented_hash = Sha256::digest(presented.as_bytes());
    let expected_hash = Sha256::digest(secret.as_bytes());
    presented_hash.ct_eq(&expected_hash).into()
}
