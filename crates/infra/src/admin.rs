//! Administrative writes to the group forest and user accounts.
//!
//! Every operation takes a [`Caller`] already resolved by a token guard (use
//! [`OperationClass::Administer`](tessera_auth::OperationClass)) and
//! authorizes it against the structure being changed. Structural changes fire
//! the hierarchy invalidation hook.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use tessera_auth::{
    Authorizer, AuthzError, Caller, Denied, Group, GroupSourceError, IntegrityViolation, Policy,
};
use tessera_core::{DomainError, GroupName, Level, Username};

use crate::identity::password::DEFAULT_COST;
use crate::identity::{IdentityStore, IdentityStoreError, User};

/// Name of the bootstrap group and of its bootstrap member.
pub const ROOT: &str = "root";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("denied: {0}")]
    Denied(Denied),

    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error(transparent)]
    Source(#[from] GroupSourceError),

    #[error(transparent)]
    Identity(#[from] IdentityStoreError),
}

impl AdminError {
    pub fn denial(&self) -> Option<&Denied> {
        match self {
            AdminError::Denied(d) => Some(d),
            _ => None,
        }
    }
}

impl From<AuthzError> for AdminError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Denied(d) => AdminError::Denied(d),
            AuthzError::Integrity(e) => AdminError::Integrity(e),
            AuthzError::Source(e) => AdminError::Source(e),
        }
    }
}

pub struct AdminService<I> {
    authorizer: Arc<Authorizer<I>>,
    password_cost: u32,
}

impl<I> AdminService<I>
where
    I: IdentityStore,
{
    pub fn new(authorizer: Arc<Authorizer<I>>) -> Self {
        Self {
            authorizer,
            password_cost: DEFAULT_COST,
        }
    }

    /// bcrypt cost for new accounts.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    fn store(&self) -> &I {
        self.authorizer.hierarchy().source()
    }

    /// Idempotently create the `root` group (level 0) and its `root` member.
    #[instrument(skip(self, root_password), err)]
    pub fn bootstrap(&self, root_password: &str) -> Result<(), AdminError> {
        let group = GroupName::parse(ROOT)?;
        let username = Username::parse(ROOT)?;

        if self.store().group(&group)?.is_none() {
            self.store().insert_group(Group::root(group.clone(), 0))?;
            self.authorizer.hierarchy().invalidate(&group);
            info!(group = %group, "bootstrap group created");
        }

        if self.store().user(&username)?.is_none() {
            let user = User::with_password(username.clone(), root_password, self.password_cost)?;
            self.store().insert_user(user, std::slice::from_ref(&group))?;
            info!(username = %username, "bootstrap user created");
        }

        Ok(())
    }

    /// Create `name` under `manager`.
    ///
    /// The caller must be in the manager's closure and hold clearance at or
    /// below `level`. Groups without a manager cannot be created this way.
    #[instrument(skip(self, caller), fields(caller = %caller.username()), err)]
    pub fn create_group(
        &self,
        caller: &Caller,
        name: GroupName,
        level: Level,
        manager: Option<GroupName>,
    ) -> Result<Group, AdminError> {
        if self.store().group(&name)?.is_some() {
            return Err(DomainError::already_exists(format!("group '{name}'")).into());
        }

        let manager_group = match &manager {
            Some(m) => Some(self.store().group(m)?.ok_or_else(|| {
                IntegrityViolation::UnknownManager {
                    group: name.clone(),
                    manager: m.clone(),
                }
            })?),
            None => None,
        };

        self.authorizer
            .authorize(caller, &Policy::authenticated().managed_by(manager).level(level))?;

        let group = Group::new(name, level, manager_group.as_ref())?;
        self.store().insert_group(group.clone())?;
        self.authorizer.hierarchy().invalidate(group.name());

        info!(group = %group.name(), level, "group created");
        Ok(group)
    }

    /// Delete `name`. Only its managers may, and only once nothing else is
    /// managed by it.
    #[instrument(skip(self, caller), fields(caller = %caller.username()), err)]
    pub fn delete_group(&self, caller: &Caller, name: &GroupName) -> Result<(), AdminError> {
        if self.store().group(name)?.is_none() {
            return Err(DomainError::absent(format!("group '{name}'")).into());
        }

        self.authorizer
            .authorize(caller, &Policy::authenticated().group(name.clone()).managers())?;

        let managed = self.store().managed_groups(name)?;
        if !managed.is_empty() {
            let managed = managed.iter().map(GroupName::as_str).collect::<Vec<_>>();
            return Err(DomainError::conflict(format!(
                "group '{name}' still manages {}",
                managed.join(", ")
            ))
            .into());
        }

        self.store().remove_group(name)?;
        self.authorizer.hierarchy().invalidate(name);

        info!(group = %name, "group deleted");
        Ok(())
    }

    /// Create `username` as a member of `groups`. Every listed group must have
    /// a manager, and the caller must be in the closure of one of them.
    #[instrument(skip(self, caller, password), fields(caller = %caller.username()), err)]
    pub fn create_user(
        &self,
        caller: &Caller,
        username: Username,
        password: &str,
        groups: Vec<GroupName>,
    ) -> Result<(), AdminError> {
        if self.store().user(&username)?.is_some() {
            return Err(DomainError::already_exists(format!("user '{username}'")).into());
        }
        if groups.is_empty() {
            return Err(DomainError::validation("a user must belong to at least one group").into());
        }
        for group in &groups {
            if self.store().group(group)?.is_none() {
                return Err(DomainError::absent(format!("group '{group}'")).into());
            }
        }

        self.authorizer
            .authorize(caller, &Policy::authenticated().groups(groups.iter().cloned()).managers())?;

        let user = User::with_password(username.clone(), password, self.password_cost)?;
        self.store().insert_user(user, &groups)?;

        info!(username = %username, groups = groups.len(), "user created");
        Ok(())
    }

    /// Delete `username`, checked against the managers of the user's groups
    /// like [`AdminService::create_user`]. A user in no group can only be
    /// removed at level 0.
    #[instrument(skip(self, caller), fields(caller = %caller.username()), err)]
    pub fn delete_user(&self, caller: &Caller, username: &Username) -> Result<(), AdminError> {
        if self.store().user(username)?.is_none() {
            return Err(DomainError::absent(format!("user '{username}'")).into());
        }

        let groups = self
            .store()
            .memberships(username)?
            .into_iter()
            .map(|m| m.group)
            .collect::<Vec<_>>();
        let policy = if groups.is_empty() {
            Policy::authenticated().level(0)
        } else {
            Policy::authenticated().groups(groups).managers()
        };
        self.authorizer.authorize(caller, &policy)?;

        self.store().remove_user(username)?;
        info!(username = %username, "user deleted");
        Ok(())
    }
}
