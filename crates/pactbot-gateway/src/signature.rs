use anyhow::{anyhow, bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Verifies a `sha256=<hex>` HMAC-SHA256 signature over the raw request body.
pub fn verify_sha256_hmac_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<()> {
    let digest_hex = signature_header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow!("signature must use sha256=<hex> format"))?;
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize hmac verifier")?;
    mac.update(payload);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("signature verification failed"))
}

/// Produces the `sha256=<hex>` header value a broker would send for `payload`.
pub fn sign_sha256_hmac(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize hmac signer")?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    Ok(format!("sha256={hex}"))
}

/// Compares an operator-supplied key against the configured one without
/// short-circuiting on the first differing byte. Both sides are reduced to a
/// fixed-length MAC so differing lengths take the same path.
pub fn debug_key_matches(observed: &str, expected: &str) -> bool {
    const CONTEXT: &[u8] = b"pactbot-debug-key";
    let Ok(mut expected_mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(CONTEXT);
    let expected_digest = expected_mac.finalize().into_bytes();
    let Ok(mut observed_mac) = Hmac::<Sha256>::new_from_slice(observed.as_bytes()) else {
        return false;
    };
    observed_mac.update(CONTEXT);
    observed_mac.verify_slice(&expected_digest).is_ok()
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if !trimmed.is_ascii() || trimmed.len() % 2 != 0 {
        bail!("signature digest must have an even number of hex characters");
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    let mut index = 0usize;
    while index < trimmed.len() {
        let next = index.saturating_add(2);
        let chunk = &trimmed[index..next];
        let byte = u8::from_str_radix(chunk, 16)
            .with_context(|| format!("invalid hex byte '{chunk}' in signature digest"))?;
        bytes.push(byte);
        index = next;
    }
    Ok(bytes)
}
