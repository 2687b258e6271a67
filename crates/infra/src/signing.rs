//! Webhook payload signing.
//!
//! The signature covers the raw request body with the per-subscription
//! secret. Kept in one place so the algorithm can be swapped without
//! touching the dispatcher.

use sha2::{Digest, Sha256};

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Pricewatch-Signature";

/// Hex-encoded SHA-256 over `secret || body`.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-shape verification helper for subscriber-side tests.
pub fn verify_payload(secret: &str, body: &str, signature: &str) -> bool {
    sign_payload(secret, body) == signature
}
