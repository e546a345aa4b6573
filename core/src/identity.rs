use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a bearer token failed verification. Kept distinct from each other
/// because callers (the HTTP layer) translate `Expired` and `Invalid` into
/// different error kinds (§7).
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("credential expired")]
    Expired,
    #[error("credential invalid")]
    Invalid,
}

/// The authenticated caller, as asserted by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOwner {
    pub owner_id: Uuid,
}

/// Seam to the external Identity collaborator (§6 "Consumed collaborators").
/// Full login/refresh flows are out of scope — this trait only covers the
/// one operation the orchestrator itself needs: verifying a bearer token
/// presented on an incoming request or WebSocket upgrade.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedOwner, IdentityError>;
}

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    sub: Uuid,
    exp: u64,
}

/// JWT-shaped stub: trusts the token's signature and `exp` claim, as decided
/// for OQ-2 — revocation is all-by-owner (there is no per-token revocation
/// list), consistent with the Credential Minter living outside this crate.
pub struct JwtIdentity {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    pub fn from_hmac_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl Identity for JwtIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedOwner, IdentityError> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(VerifiedOwner {
                owner_id: data.claims.sub,
            }),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(IdentityError::Expired),
                _ => Err(IdentityError::Invalid),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token_with_exp(secret: &[u8], owner_id: Uuid, exp: u64) -> String {
        let claims = Claims { sub: owner_id, exp };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn valid_token_resolves_owner() {
        let secret = b"test-secret";
        let owner_id = Uuid::new_v4();
        let exp = (chrono::Utc::now() + chrono::Duration::minutes(5)).timestamp() as u64;
        let token = token_with_exp(secret, owner_id, exp);

        let identity = JwtIdentity::from_hmac_secret(secret);
        let verified = identity.verify(&token).await.unwrap();
        assert_eq!(verified.owner_id, owner_id);
    }

    #[tokio::test]
    async fn expired_token_is_distinguished_from_invalid() {
        let secret = b"test-secret";
        let owner_id = Uuid::new_v4();
        let exp = (chrono::Utc::now() - chrono::Duration::minutes(5)).timestamp() as u64;
        let token = token_with_exp(secret, owner_id, exp);

        let identity = JwtIdentity::from_hmac_secret(secret);
        let err = identity.verify(&token).await.unwrap_err();
        assert!(matches!(err, IdentityError::Expired));

        let garbage_err = identity.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(garbage_err, IdentityError::Invalid));
    }
}
