use std::sync::Arc;

use thiserror::Error;

use tessera_auth::{Group, GroupSource, GroupSourceError, Membership};
use tessera_core::{GroupName, Username};

use super::password;

/// A stored account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub username: Username,
    /// Opaque one-way hash; only ever compared through [`User::verify`].
    pub password_hash: String,
}

impl User {
    pub fn new(username: Username, password_hash: impl Into<String>) -> Self {
        Self {
            username,
            password_hash: password_hash.into(),
        }
    }

    /// Hash `password` with bcrypt at `cost`.
    pub fn with_password(
        username: Username,
        password: &str,
        cost: u32,
    ) -> Result<Self, IdentityStoreError> {
        Ok(Self::new(username, password::hash_password(password, cost)?))
    }

    pub fn verify(&self, candidate: &str) -> bool {
        password::verify_password(candidate, &self.password_hash)
    }
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Identity store operation error.
///
/// These are infrastructure errors. Whether a record exists is reported
/// through `Option`/`bool` returns, not through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityStoreError {
    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("identity backend error: {0}")]
    Backend(String),
}

impl From<IdentityStoreError> for GroupSourceError {
    fn from(value: IdentityStoreError) -> Self {
        GroupSourceError(value.to_string())
    }
}

/// Users, groups, and memberships.
///
/// Group lookups come from the [`GroupSource`] supertrait so one store can
/// back both the hierarchy and the token layer.
pub trait IdentityStore: GroupSource {
    fn user(&self, username: &Username) -> Result<Option<User>, IdentityStoreError>;

    /// The user's memberships with each group's level resolved. Unknown users
    /// have none.
    fn memberships(&self, username: &Username) -> Result<Vec<Membership>, IdentityStoreError>;

    /// `false` for unknown users and wrong passwords alike.
    fn verify_password(
        &self,
        username: &Username,
        candidate: &str,
    ) -> Result<bool, IdentityStoreError> {
        Ok(self
            .user(username)?
            .is_some_and(|user| user.verify(candidate)))
    }

    /// Insert a new group. Fails with `Duplicate` if the name is taken.
    fn insert_group(&self, group: Group) -> Result<(), IdentityStoreError>;

    /// Remove a group and every membership in it. Returns whether it existed.
    fn remove_group(&self, name: &GroupName) -> Result<bool, IdentityStoreError>;

    /// Names of the groups whose manager is `manager`.
    fn managed_groups(&self, manager: &GroupName) -> Result<Vec<GroupName>, IdentityStoreError>;

    /// Insert a new user as a member of `groups`, all of which must exist.
    fn insert_user(&self, user: User, groups: &[GroupName]) -> Result<(), IdentityStoreError>;

    /// Remove a user and their memberships. Returns whether they existed.
    fn remove_user(&self, username: &Username) -> Result<bool, IdentityStoreError>;
}

impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    fn user(&self, username: &Username) -> Result<Option<User>, IdentityStoreError> {
        (**self).user(username)
    }

    fn memberships(&self, username: &Username) -> Result<Vec<Membership>, IdentityStoreError> {
        (**self).memberships(username)
    }

    fn verify_password(
        &self,
        username: &Username,
        candidate: &str,
    ) -> Result<bool, IdentityStoreError> {
        (**self).verify_password(username, candidate)
    }

    fn insert_group(&self, group: Group) -> Result<(), IdentityStoreError> {
        (**self).insert_group(group)
    }

    fn remove_group(&self, name: &GroupName) -> Result<bool, IdentityStoreError> {
        (**self).remove_group(name)
    }

    fn managed_groups(&self, manager: &GroupName) -> Result<Vec<GroupName>, IdentityStoreError> {
        (**self).managed_groups(manager)
    }

    fn insert_user(&self, user: User, groups: &[GroupName]) -> Result<(), IdentityStoreError> {
        (**self).insert_user(user, groups)
    }

    fn remove_user(&self, username: &Username) -> Result<bool, IdentityStoreError> {
        (**self).remove_user(username)
    }
}
