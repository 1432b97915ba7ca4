//! HMAC signatures over the request body, GitHub style.
//!
//! `X-Hub-Signature` carries `sha1=<hex>` and `X-Hub-Signature-256`
//! carries `sha256=<hex>`, both computed over the exact bytes sent.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";

/// `sha1=<hex HMAC-SHA1(secret, body)>`
pub fn sign_sha1(secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

/// `sha256=<hex HMAC-SHA256(secret, body)>`
pub fn sign_sha256(secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a `sha1=` or `sha256=` header against the body, the way a
/// receiving endpoint would.
#[cfg(test)]
pub(crate) fn verify_signature(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let result = if let Some(hex_sig) = signature_header.strip_prefix("sha256=") {
        hex::decode(hex_sig).map(|sig| {
            HmacSha256::new_from_slice(secret)
                .map(|mut mac| {
                    mac.update(body);
                    mac.verify_slice(&sig).is_ok()
                })
                .unwrap_or(false)
        })
    } else if let Some(hex_sig) = signature_header.strip_prefix("sha1=") {
        hex::decode(hex_sig).map(|sig| {
            HmacSha1::new_from_slice(secret)
                .map(|mut mac| {
                    mac.update(body);
                    mac.verify_slice(&sig).is_ok()
                })
                .unwrap_or(false)
        })
    } else {
        return false;
    };

    result.unwrap_or(false)
}
