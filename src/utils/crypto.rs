// ──────────────────────────── HMAC / hashing ─────────────────────────────── //

/// Compute HMAC-SHA-256 from raw byte inputs and return raw bytes.
pub fn hmac_sha256_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC: any key size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison of two byte strings (timing-attack safe).
///
/// Returns `true` only when both length and content match.
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

// ─────────────────────────── Base-64 helpers ─────────────────────────────── //

/// Encode bytes to URL-safe Base64 (no padding).
pub fn b64url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// Decode a URL-safe Base64 string (no padding).  Returns `None` on invalid
/// input.
pub fn b64url_decode(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64url_round_trip() {
        let raw = b"hello, websocket";
        let encoded = b64url_encode(raw);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), raw);
    }

    #[test]
    fn b64url_decode_rejects_garbage() {
        assert!(b64url_decode("not base64 at all!!!").is_none());
    }

    #[test]
    fn secure_compare_semantics() {
        assert!(secure_compare(b"abc", b"abc"));
        assert!(!secure_compare(b"abc", b"abd"));
        assert!(!secure_compare(b"abc", b"abcd"));
    }

    #[test]
    fn hmac_is_keyed() {
        let a = hmac_sha256_bytes(b"key-one", b"payload");
        let b = hmac_sha256_bytes(b"key-two", b"payload");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
