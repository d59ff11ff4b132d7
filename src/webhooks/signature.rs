//! HMAC-SHA256 verification of the `X-Hub-Signature-256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Decodes `sha256=<hex>`. `None` for any other shape.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// Checks `header` against the HMAC of `payload` under `secret`.
///
/// The comparison is constant time.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &[u8],
) -> Result<(), WebhookError> {
    let header = header.ok_or(WebhookError::MissingSignature)?;
    let expected = parse_signature_header(header).ok_or(WebhookError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// The header value GitHub would send for `payload`.
#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
