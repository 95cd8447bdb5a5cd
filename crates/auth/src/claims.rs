use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_core::{Jti, Username};

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer token claims (transport-agnostic).
///
/// Timestamps are carried as unix seconds on the wire, so they are truncated
/// to whole seconds at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Unique token identifier; also the revocation registry key suffix.
    pub jti: Jti,

    /// Identity the token is bound to.
    pub sub: Username,

    #[serde(rename = "type")]
    pub kind: TokenKind,

    /// Minted directly from a credential check (never true for refresh
    /// tokens or for access tokens obtained through a refresh exchange).
    pub fresh: bool,

    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl TokenClaims {
    /// Fails with [`TokenValidationError::InvalidTimeWindow`] when
    /// `issued_at + lifetime` is not representable.
    pub fn new(
        sub: Username,
        kind: TokenKind,
        fresh: bool,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<Self, TokenValidationError> {
        let issued_at = issued_at.with_nanosecond(0).unwrap_or(issued_at);
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .ok_or(TokenValidationError::InvalidTimeWindow)?;
        Ok(Self {
            jti: Jti::new(),
            sub,
            kind,
            fresh: fresh && kind == TokenKind::Access,
            issued_at,
            expires_at,
        })
    }

    pub fn identity(&self) -> &Username {
        &self.sub
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token signature is invalid")]
    Signature,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Deterministically validate the claims' time window against `now`.
///
/// Signature verification happens in the codec; this only checks claims.
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Username {
        Username::parse("alice").unwrap()
    }

    #[test]
    fn refresh_tokens_are_never_fresh() {
        let claims = TokenClaims::new(alice(), TokenKind::Refresh, true, Utc::now(), Duration::days(1)).unwrap();
        assert!(!claims.fresh);
    }

    #[test]
    fn issued_at_is_truncated_to_seconds() {
        let claims = TokenClaims::new(alice(), TokenKind::Access, true, Utc::now(), Duration::minutes(15)).unwrap();
        assert_eq!(claims.issued_at.nanosecond(), 0);
        assert_eq!(claims.lifetime(), Duration::minutes(15));
    }

    #[test]
    fn unrepresentable_expiry_is_rejected() {
        let err = TokenClaims::new(alice(), TokenKind::Access, true, Utc::now(), Duration::MAX).unwrap_err();
        assert_eq!(err, TokenValidationError::InvalidTimeWindow);
    }

    #[test]
    fn window_checks() {
        let now = Utc::now();
        let claims = TokenClaims::new(alice(), TokenKind::Access, true, now, Duration::minutes(15)).unwrap();

        assert_eq!(validate_claims(&claims, now), Ok(()));
        assert_eq!(
            validate_claims(&claims, claims.expires_at),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&claims, claims.issued_at - Duration::seconds(1)),
            Err(TokenValidationError::NotYetValid)
        );

        let inverted = TokenClaims {
            expires_at: claims.issued_at,
            ..claims
        };
        assert_eq!(
            validate_claims(&inverted, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    #[test]
    fn wire_names_are_compact() {
        let claims = TokenClaims::new(alice(), TokenKind::Refresh, false, Utc::now(), Duration::hours(1)).unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "refresh");
        assert_eq!(json["sub"], "alice");
        assert!(json["exp"].is_i64());
    }
}
