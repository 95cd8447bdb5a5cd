//! Configuration loading and representation.
//!
//! Every value has a default except the signing secret outside development,
//! see [`AuthSettings::from_env`].

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use tessera_auth::DEFAULT_MAX_DEPTH;

pub const JWT_SECRET_ENV: &str = "TESSERA_JWT_SECRET";
pub const ACCESS_TTL_ENV: &str = "TESSERA_ACCESS_TTL_SECS";
pub const REFRESH_TTL_ENV: &str = "TESSERA_REFRESH_TTL_SECS";
pub const REGISTRY_TTL_FACTOR_ENV: &str = "TESSERA_REGISTRY_TTL_FACTOR";
pub const REGISTRY_NAMESPACE_ENV: &str = "TESSERA_REGISTRY_NAMESPACE";
pub const MAX_HIERARCHY_DEPTH_ENV: &str = "TESSERA_MAX_HIERARCHY_DEPTH";
pub const CLOSURE_CACHE_SECS_ENV: &str = "TESSERA_CLOSURE_CACHE_SECS";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const DEV_SECRET: &str = "dev-secret";

/// Upper bound for either token lifetime (100 years).
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
pub const MAX_REGISTRY_TTL_FACTOR: f64 = 10.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid value: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Registry entry lifetime as a multiple of the token lifetime.
    pub registry_ttl_factor: f64,
    pub registry_namespace: String,
    pub max_hierarchy_depth: usize,
    /// Upper bound on how long a cached management closure is served.
    pub closure_cache_max_age: Option<Duration>,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_SECRET.to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            registry_ttl_factor: 1.2,
            registry_namespace: "auth.live".to_string(),
            max_hierarchy_depth: DEFAULT_MAX_DEPTH,
            closure_cache_max_age: None,
            redis_url: None,
            database_url: None,
        }
    }
}

impl core::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("registry_ttl_factor", &self.registry_ttl_factor)
            .field("registry_namespace", &self.registry_namespace)
            .field("max_hierarchy_depth", &self.max_hierarchy_depth)
            .field("closure_cache_max_age", &self.closure_cache_max_age)
            .field("redis_url", &self.redis_url)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthSettings {
    /// Read settings from the process environment.
    ///
    /// A missing `TESSERA_JWT_SECRET` falls back to an insecure development
    /// secret with a warning.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = var(JWT_SECRET_ENV).unwrap_or_else(|| {
            warn!("{JWT_SECRET_ENV} not set; using insecure dev default");
            defaults.jwt_secret.clone()
        });

        let settings = Self {
            jwt_secret,
            access_ttl: parse_secs(ACCESS_TTL_ENV, var(ACCESS_TTL_ENV))?.unwrap_or(defaults.access_ttl),
            refresh_ttl: parse_secs(REFRESH_TTL_ENV, var(REFRESH_TTL_ENV))?
                .unwrap_or(defaults.refresh_ttl),
            registry_ttl_factor: parse(REGISTRY_TTL_FACTOR_ENV, var(REGISTRY_TTL_FACTOR_ENV))?
                .unwrap_or(defaults.registry_ttl_factor),
            registry_namespace: var(REGISTRY_NAMESPACE_ENV).unwrap_or(defaults.registry_namespace),
            max_hierarchy_depth: parse(MAX_HIERARCHY_DEPTH_ENV, var(MAX_HIERARCHY_DEPTH_ENV))?
                .unwrap_or(defaults.max_hierarchy_depth),
            closure_cache_max_age: parse_secs(CLOSURE_CACHE_SECS_ENV, var(CLOSURE_CACHE_SECS_ENV))?,
            redis_url: var(REDIS_URL_ENV),
            database_url: var(DATABASE_URL_ENV),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::invalid(JWT_SECRET_ENV, "must not be empty"));
        }
        check_ttl(ACCESS_TTL_ENV, self.access_ttl)?;
        check_ttl(REFRESH_TTL_ENV, self.refresh_ttl)?;
        let factor = self.registry_ttl_factor;
        if !(factor > 1.0 && factor <= MAX_REGISTRY_TTL_FACTOR) {
            return Err(ConfigError::invalid(
                REGISTRY_TTL_FACTOR_ENV,
                format!("{factor} must be greater than 1.0 and at most {MAX_REGISTRY_TTL_FACTOR}"),
            ));
        }
        if self.registry_namespace.is_empty() || self.registry_namespace.ends_with('.') {
            return Err(ConfigError::invalid(
                REGISTRY_NAMESPACE_ENV,
                "must be non-empty and must not end with '.'",
            ));
        }
        if self.max_hierarchy_depth == 0 {
            return Err(ConfigError::invalid(MAX_HIERARCHY_DEPTH_ENV, "must be at least 1"));
        }
        Ok(())
    }

    /// Whether the insecure development secret is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_SECRET
    }
}

fn check_ttl(var: &'static str, ttl: Duration) -> Result<(), ConfigError> {
    if ttl.is_zero() {
        return Err(ConfigError::invalid(var, "must be positive"));
    }
    if ttl > MAX_TOKEN_TTL {
        return Err(ConfigError::invalid(
            var,
            format!("{}s exceeds the {}s maximum", ttl.as_secs(), MAX_TOKEN_TTL.as_secs()),
        ));
    }
    Ok(())
}

fn parse<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.map(|raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, format!("'{raw}': {e}")))
    })
    .transpose()
}

fn parse_secs(var: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(var, raw)?.map(Duration::from_secs))
}
