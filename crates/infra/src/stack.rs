//! Wiring of the engine, token service, and admin service over one identity
//! store and one registry.

use std::sync::Arc;

use anyhow::Context;

use tessera_auth::{Authorizer, GroupHierarchy, Hs256TokenCodec};

use crate::admin::AdminService;
use crate::config::{AuthSettings, ConfigError};
use crate::identity::{IdentityStore, InMemoryIdentityStore};
use crate::registry::{InMemoryRevocationRegistry, RevocationRegistry};
use crate::tokens::{TokenService, TokenSettings};

pub struct AuthStack<I, R> {
    pub authorizer: Arc<Authorizer<I>>,
    pub tokens: TokenService<I, R, Hs256TokenCodec>,
    pub admin: AdminService<I>,
}

impl<I, R> AuthStack<I, R>
where
    I: IdentityStore,
    R: RevocationRegistry,
{
    pub fn new(identity: I, registry: R, settings: &AuthSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let hierarchy = GroupHierarchy::new(identity)
            .with_max_depth(settings.max_hierarchy_depth)
            .with_max_age(settings.closure_cache_max_age);
        let authorizer = Arc::new(Authorizer::new(hierarchy));

        let tokens = TokenService::new(
            authorizer.clone(),
            registry,
            Hs256TokenCodec::new(&settings.jwt_secret),
            TokenSettings::from(settings),
        );
        let admin = AdminService::new(authorizer.clone());

        Ok(Self {
            authorizer,
            tokens,
            admin,
        })
    }
}

pub type InMemoryAuthStack = AuthStack<Arc<InMemoryIdentityStore>, Arc<InMemoryRevocationRegistry>>;

/// In-process stack configured from the environment, with the root account
/// bootstrapped.
pub fn in_memory_from_env(root_password: &str) -> anyhow::Result<InMemoryAuthStack> {
    let settings = AuthSettings::from_env().context("loading auth settings")?;
    let stack = AuthStack::new(
        Arc::new(InMemoryIdentityStore::new()),
        Arc::new(InMemoryRevocationRegistry::new()),
        &settings,
    )
    .context("wiring auth stack")?;
    stack
        .admin
        .bootstrap(root_password)
        .context("bootstrapping root account")?;
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessera_core::Username;

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = AuthSettings {
            registry_ttl_factor: 1.0,
            ..AuthSettings::default()
        };
        let result = AuthStack::new(
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(InMemoryRevocationRegistry::new()),
            &settings,
        );
        assert!(result.is_err());
    }

    #[test]
    fn bootstrapped_root_can_log_in() -> anyhow::Result<()> {
        let stack = in_memory_from_env("rootpw")?;
        let pair = stack.tokens.login(&Username::parse("root")?, "rootpw")?;
        let caller = stack.tokens.require_fresh(&pair.access.token, &tessera_auth::Policy::authenticated())?;
        assert_eq!(caller.clearance(), Some(0));
        Ok(())
    }
}
