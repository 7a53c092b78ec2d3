//! GitHub webhook signature verification (`X-Hub-Signature-256`)

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies a GitHub `X-Hub-Signature-256` header against the raw payload.
///
/// Malformed input (missing or foreign prefix, upper-case or bad hex, wrong
/// length) yields `false`; a wrong prefix is rejected before any digest is
/// computed. The
/// digest comparison goes through `Mac::verify_slice`, which is constant-time.
pub fn verify_github_signature(secret: &[u8], payload: &[u8], signature_header: &str) -> bool {
    let Some(declared_hex) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    // GitHub sends lower-case hex; the header must match that rendering exactly
    if declared_hex.bytes().any(|b| b.is_ascii_uppercase()) {
        return false;
    }

    let Ok(declared) = hex::decode(declared_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&declared).is_ok()
}

/// Produces the `sha256=<hex>` header value GitHub would send for `payload`.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}
