use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of a raw payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature over `payload` using constant-time comparison.
///
/// Signatures are compared case-insensitively on their hex form.
pub fn verify_payload_signature(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = sign_payload(secret, payload)?;
    let provided = signature.trim().to_ascii_lowercase();

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = provided.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"payment.captured"}"#;

    #[test]
    fn test_signature_generation_and_verification() {
        let signature = sign_payload(SECRET, BODY).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_payload_signature(SECRET, BODY, &signature).unwrap());
        assert!(verify_payload_signature(SECRET, BODY, &signature.to_uppercase()).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let signature = sign_payload(SECRET, BODY).unwrap();
        let flipped = if signature.starts_with('a') { "b" } else { "a" };
        let invalid_signature = format!("{}{}", flipped, &signature[1..]);
        assert!(!verify_payload_signature(SECRET, BODY, &invalid_signature).unwrap());
        assert!(!verify_payload_signature(SECRET, BODY, "short").unwrap());
    }

    #[test]
    fn test_tampered_body() {
        let signature = sign_payload(SECRET, BODY).unwrap();
        let modified_body = br#"{"event":"payment.failed"}"#;
        assert!(!verify_payload_signature(SECRET, modified_body, &signature).unwrap());
    }
}
