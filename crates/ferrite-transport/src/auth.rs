//! Bearer-token auth between drives: every request carries a short-lived
//! HS512 JWT minted from the deployment's shared secret.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

/// How long a minted token is accepted for. Short enough that a leaked
/// token is useless quickly, long enough to cover one long-lived streaming
/// request plus clock skew between drives.
pub const TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuing drive's id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue(&self, drive_id: &str) -> std::result::Result<String, TransportError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: drive_id.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECONDS,
        };
        encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TransportError::Auth(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TransportError> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| TransportError::Auth(e.to_string()))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_the_same_secret() {
        let issuer = TokenIssuer::new(b"deployment-shared-secret".to_vec());
        let token = issuer.issue("drive-7").unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "drive-7");
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let a = TokenIssuer::new(b"secret-a".to_vec());
        let b = TokenIssuer::new(b"secret-b".to_vec());
        let token = a.issue("drive-7").unwrap();
        assert!(b.verify(&token).is_err());
    }
}
