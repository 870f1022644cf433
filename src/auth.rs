use serde::{Deserialize, Serialize};

use crate::errors::DeliveryError;
use crate::utils::crypto::{b64url_decode, b64url_encode, hmac_sha256_bytes, secure_compare};
use crate::utils::time_utils::now_sec;

/// Identity extracted from a verified connection token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub name: String,
    pub exp: i64,
}

/// Validates a caller's identity at connect/request time.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, DeliveryError>;
}

/// HS256 JWT verification against a shared secret.
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Sign a token for `user_id`, valid for `ttl_secs`. Used by tests and
    /// operator tooling; the service itself only verifies.
    pub fn mint(&self, user_id: i64, name: &str, ttl_secs: i64) -> String {
        let header = b64url_encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = Claims {
            user_id,
            name: name.to_string(),
            exp: now_sec() + ttl_secs,
        };
        let payload = b64url_encode(&serde_json::to_vec(&claims).expect("claims serialize"));
        let signing_input = format!("{}.{}", header, payload);
        let signature = b64url_encode(&hmac_sha256_bytes(&self.secret, signing_input.as_bytes()));
        format!("{}.{}", signing_input, signature)
    }
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: String,
}

impl Authenticator for TokenVerifier {
    fn verify(&self, token: &str) -> Result<Claims, DeliveryError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(DeliveryError::Unauthenticated("malformed token")),
            };

        let header_raw = b64url_decode(header_b64)
            .ok_or(DeliveryError::Unauthenticated("malformed token header"))?;
        let header: JwtHeader = serde_json::from_slice(&header_raw)
            .map_err(|_| DeliveryError::Unauthenticated("malformed token header"))?;
        if header.alg != "HS256" {
            return Err(DeliveryError::Unauthenticated("unsupported algorithm"));
        }

        let signature = b64url_decode(signature_b64)
            .ok_or(DeliveryError::Unauthenticated("malformed signature"))?;
        let signing_input = format!("{}.{}", header_b64, payload_b64);
        let expected = hmac_sha256_bytes(&self.secret, signing_input.as_bytes());
        if !secure_compare(&signature, &expected) {
            return Err(DeliveryError::Unauthenticated("signature mismatch"));
        }

        let payload_raw = b64url_decode(payload_b64)
            .ok_or(DeliveryError::Unauthenticated("malformed claims"))?;
        let claims: Claims = serde_json::from_slice(&payload_raw)
            .map_err(|_| DeliveryError::Unauthenticated("malformed claims"))?;
        if claims.exp <= now_sec() {
            return Err(DeliveryError::Unauthenticated("token expired"));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_verify() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.mint(1, "server", 3600);
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.user_id, 1);
        assert_eq!(claims.name, "server");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = TokenVerifier::new("secret-a").mint(1, "server", 3600);
        let err = TokenVerifier::new("secret-b").verify(&token).unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthenticated(_)));
    }

    #[test]
    fn rejects_tampered_payload() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.mint(1, "server", 3600);
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64url_encode(br#"{"userId":999,"name":"mallory","exp":9999999999}"#);
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(verifier.verify(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.mint(1, "server", -10);
        let err = verifier.verify(&token).unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthenticated("token expired")));
    }

    #[test]
    fn rejects_garbage() {
        let verifier = TokenVerifier::new("test-secret");
        assert!(verifier.verify("not-a-token").is_err());
        assert!(verifier.verify("a.b").is_err());
        assert!(verifier.verify("a.b.c.d").is_err());
    }
}
