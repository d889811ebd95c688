use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of a raw request body.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(body);
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify a hex HMAC-SHA256 body signature using constant-time comparison.
///
/// Hex case is not significant; anything else that differs is a mismatch.
pub fn verify_body_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = sign_body(secret, body)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature = signature.trim().to_ascii_lowercase();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
