//! Token encoding/decoding.
//!
//! The codec turns claims into a signed bearer string and back. It performs
//! no registry lookups: a token that decodes cleanly may still be revoked.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::{TokenClaims, TokenValidationError, validate_claims};

pub trait TokenCodec: Send + Sync {
    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenValidationError>;

    /// Verify the signature and the time window at `now`.
    fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenValidationError>;
}

/// HMAC-SHA256 signed JWT codec.
pub struct Hs256TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Hs256TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run against the caller-supplied `now` in `validate_claims`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec for Hs256TokenCodec {
    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenValidationError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenValidationError::Encoding(e.to_string()))
    }

    fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenValidationError::Signature,
                ErrorKind::ExpiredSignature => TokenValidationError::Expired,
                ErrorKind::ImmatureSignature => TokenValidationError::NotYetValid,
                _ => TokenValidationError::Malformed(e.to_string()),
            })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl<C> TokenCodec for std::sync::Arc<C>
where
    C: TokenCodec + ?Sized,
{
    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenValidationError> {
        (**self).encode(claims)
    }

    fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenValidationError> {
        (**self).decode(token, now)
    }
}
