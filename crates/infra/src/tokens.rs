//! Token lifecycle: issuance, liveness registration, revocation, and the
//! guards that gate every authorized operation.
//!
//! A token is usable only while its registry entry exists. Revocation deletes
//! the entry; the registry TTL removes it shortly after the token's own expiry.
//! Either way the caller sees the same `revoked-or-expired` denial.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use tessera_auth::{
    Authorizer, AuthzError, Caller, Denied, GroupSourceError, IntegrityViolation, OperationClass,
    Policy, TokenClaims, TokenCodec, TokenKind, TokenRequirement, TokenValidationError,
};
use tessera_core::{Jti, Username};

use crate::config::AuthSettings;
use crate::identity::{IdentityStore, IdentityStoreError};
use crate::registry::{RegistryError, RevocationRegistry};

#[derive(Debug, Error)]
pub enum TokenError {
    /// Unknown user or wrong password; the two are never distinguished.
    #[error("authentication failed: invalid credential")]
    Authentication,

    #[error("denied: {0}")]
    Denied(Denied),

    /// Bad signature or malformed input.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenValidationError),

    #[error("integrity violation: {0}")]
    Integrity(IntegrityViolation),

    #[error(transparent)]
    Source(GroupSourceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Identity(#[from] IdentityStoreError),

    #[error("token record serialization failed: {0}")]
    Serialization(String),

    #[error("token lifetime out of range: {0}")]
    LifetimeOutOfRange(String),
}

impl TokenError {
    pub fn denial(&self) -> Option<&Denied> {
        match self {
            TokenError::Denied(d) => Some(d),
            _ => None,
        }
    }
}

impl From<Denied> for TokenError {
    fn from(value: Denied) -> Self {
        TokenError::Denied(value)
    }
}

impl From<AuthzError> for TokenError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Denied(d) => TokenError::Denied(d),
            AuthzError::Integrity(e) => TokenError::Integrity(e),
            AuthzError::Source(e) => TokenError::Source(e),
        }
    }
}

/// Lifetimes and registry layout for issued tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Registry entries outlive the token by this factor (`> 1.0`).
    pub registry_ttl_factor: f64,
    pub registry_namespace: String,
}

impl Default for TokenSettings {
    fn default() -> Self {
        TokenSettings::from(&AuthSettings::default())
    }
}

impl From<&AuthSettings> for TokenSettings {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
            registry_ttl_factor: settings.registry_ttl_factor,
            registry_namespace: settings.registry_namespace.clone(),
        }
    }
}

impl TokenSettings {
    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    pub fn registry_ttl(&self, lifetime: Duration) -> Result<Duration, TokenError> {
        Duration::try_from_secs_f64(lifetime.as_secs_f64() * self.registry_ttl_factor).map_err(|e| {
            TokenError::LifetimeOutOfRange(format!(
                "{lifetime:?} x {}: {e}",
                self.registry_ttl_factor
            ))
        })
    }

    pub fn registry_key(&self, jti: &Jti) -> String {
        format!("{}.{}", self.registry_namespace, jti)
    }

    fn registry_prefix(&self) -> String {
        format!("{}.", self.registry_namespace)
    }
}

/// A signed token and the claims it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Token lifecycle plus the guards built on it.
///
/// The identity store is reached through the authorizer's hierarchy so that
/// group lookups and membership lookups share one source.
pub struct TokenService<I, R, C> {
    authorizer: Arc<Authorizer<I>>,
    registry: R,
    codec: C,
    settings: TokenSettings,
}

impl<I, R, C> TokenService<I, R, C>
where
    I: IdentityStore,
    R: RevocationRegistry,
    C: TokenCodec,
{
    pub fn new(authorizer: Arc<Authorizer<I>>, registry: R, codec: C, settings: TokenSettings) -> Self {
        Self {
            authorizer,
            registry,
            codec,
            settings,
        }
    }

    pub fn authorizer(&self) -> &Arc<Authorizer<I>> {
        &self.authorizer
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    fn identity(&self) -> &I {
        self.authorizer.hierarchy().source()
    }

    /// Verify the credential and mint one token. Only access tokens minted
    /// here are fresh.
    #[instrument(skip_all, fields(username = %username, kind = %kind), err)]
    pub fn issue(
        &self,
        username: &Username,
        password: &str,
        kind: TokenKind,
    ) -> Result<IssuedToken, TokenError> {
        self.authenticate(username, password)?;
        self.mint(username.clone(), kind, kind == TokenKind::Access)
    }

    /// One credential check, a fresh access token and a refresh token.
    #[instrument(skip_all, fields(username = %username), err)]
    pub fn login(&self, username: &Username, password: &str) -> Result<TokenPair, TokenError> {
        self.authenticate(username, password)?;
        Ok(TokenPair {
            access: self.mint(username.clone(), TokenKind::Access, true)?,
            refresh: self.mint(username.clone(), TokenKind::Refresh, false)?,
        })
    }

    /// Exchange a live refresh token for a stale access token.
    #[instrument(skip(self, refresh_token), err)]
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, TokenError> {
        let caller = self.require(refresh_token, &Policy::for_operation(OperationClass::Refresh))?;
        self.mint(caller.username().clone(), TokenKind::Access, false)
    }

    /// Delete the registry entry for `jti`. Returns whether it was live.
    #[instrument(skip_all, fields(jti = %jti), err)]
    pub fn revoke(&self, jti: &Jti) -> Result<bool, TokenError> {
        let removed = self.registry.delete(&self.settings.registry_key(jti))?;
        info!(jti = %jti, removed, "token revoked");
        Ok(removed)
    }

    /// Validate `token` and revoke it.
    #[instrument(skip(self, token), err)]
    pub fn logout(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.check_valid(token)?;
        self.revoke(&claims.jti)?;
        Ok(claims)
    }

    /// Decode `token` and confirm its registry entry is present.
    pub fn check_valid(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.check_valid_at(token, Utc::now())
    }

    /// [`TokenService::check_valid`] against an explicit clock.
    pub fn check_valid_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let claims = self.codec.decode(token, now).map_err(|e| match e {
            TokenValidationError::Expired => TokenError::Denied(Denied::RevokedOrExpired),
            other => TokenError::InvalidToken(other),
        })?;

        if self.registry.get(&self.settings.registry_key(&claims.jti))?.is_none() {
            debug!(jti = %claims.jti, "token has no live registry entry");
            return Err(Denied::RevokedOrExpired.into());
        }

        Ok(claims)
    }

    /// Validate the token, enforce the policy's token requirement, then
    /// authorize the resolved caller against the policy.
    #[instrument(skip(self, token, policy), err)]
    pub fn require(&self, token: &str, policy: &Policy) -> Result<Caller, TokenError> {
        let claims = self.check_valid(token)?;
        policy.token().check(claims.kind, claims.fresh)?;

        let caller = self.resolve_caller(&claims.sub)?;
        self.authorizer.authorize(&caller, policy)?;
        Ok(caller)
    }

    /// Any live access token, fresh or stale.
    pub fn require_access(&self, token: &str, policy: &Policy) -> Result<Caller, TokenError> {
        self.require(token, &policy.clone().with_token(TokenRequirement::Access))
    }

    pub fn require_fresh(&self, token: &str, policy: &Policy) -> Result<Caller, TokenError> {
        self.require(token, &policy.clone().with_token(TokenRequirement::FreshAccess))
    }

    pub fn require_refresh(&self, token: &str, policy: &Policy) -> Result<Caller, TokenError> {
        self.require(token, &policy.clone().with_token(TokenRequirement::Refresh))
    }

    /// Every live token in the namespace. Requires a fresh access token held
    /// by a level-0 caller.
    #[instrument(skip(self, token), err)]
    pub fn list_active(&self, token: &str) -> Result<Vec<(Jti, TokenClaims)>, TokenError> {
        self.require(token, &Policy::for_operation(OperationClass::Introspect))?;

        let mut active = Vec::new();
        for key in self.registry.scan_prefix(&self.settings.registry_prefix())? {
            // Revoked or expired between the scan and the read.
            let Some(record) = self.registry.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<TokenClaims>(&record) {
                Ok(claims) => active.push((claims.jti, claims)),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable token record"),
            }
        }

        active.sort_by(|(_, a), (_, b)| a.issued_at.cmp(&b.issued_at).then(a.sub.cmp(&b.sub)));
        Ok(active)
    }

    fn authenticate(&self, username: &Username, password: &str) -> Result<(), TokenError> {
        if self.identity().verify_password(username, password)? {
            Ok(())
        } else {
            info!(username = %username, "credential check failed");
            Err(TokenError::Authentication)
        }
    }

    /// A token whose user has since been deleted no longer authenticates.
    fn resolve_caller(&self, username: &Username) -> Result<Caller, TokenError> {
        if self.identity().user(username)?.is_none() {
            return Err(TokenError::Authentication);
        }
        let memberships = self.identity().memberships(username)?;
        Ok(Caller::new(username.clone(), memberships))
    }

    fn mint(&self, sub: Username, kind: TokenKind, fresh: bool) -> Result<IssuedToken, TokenError> {
        let lifetime = self.settings.lifetime(kind);
        let registry_ttl = self.settings.registry_ttl(lifetime)?;
        let chrono_lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| TokenError::LifetimeOutOfRange(format!("{lifetime:?}: {e}")))?;

        let claims = TokenClaims::new(sub, kind, fresh, Utc::now(), chrono_lifetime)
            .map_err(|e| TokenError::LifetimeOutOfRange(format!("{lifetime:?}: {e}")))?;
        let token = self.codec.encode(&claims)?;
        let record =
            serde_json::to_string(&claims).map_err(|e| TokenError::Serialization(e.to_string()))?;

        self.registry.set(
            &self.settings.registry_key(&claims.jti),
            &record,
            registry_ttl,
        )?;

        info!(
            username = %claims.sub,
            jti = %claims.jti,
            kind = %claims.kind,
            fresh = claims.fresh,
            "token issued"
        );
        Ok(IssuedToken { token, claims })
    }
}
