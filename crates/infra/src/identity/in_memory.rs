use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use tessera_auth::{Group, GroupSource, GroupSourceError, Membership};
use tessera_core::{GroupName, Username};

use super::r#trait::{IdentityStore, IdentityStoreError, User};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Username, User>,
    groups: HashMap<GroupName, Group>,
    /// Username -> group names, kept sorted for deterministic membership order.
    memberships: HashMap<Username, BTreeSet<GroupName>>,
}

/// In-memory identity store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, IdentityStoreError> {
        self.tables
            .read()
            .map_err(|_| IdentityStoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, IdentityStoreError> {
        self.tables
            .write()
            .map_err(|_| IdentityStoreError::Backend("lock poisoned".to_string()))
    }
}

impl GroupSource for InMemoryIdentityStore {
    fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
        Ok(self.read()?.groups.get(name).cloned())
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn user(&self, username: &Username) -> Result<Option<User>, IdentityStoreError> {
        Ok(self.read()?.users.get(username).cloned())
    }

    fn memberships(&self, username: &Username) -> Result<Vec<Membership>, IdentityStoreError> {
        let tables = self.read()?;
        let Some(names) = tables.memberships.get(username) else {
            return Ok(vec![]);
        };

        Ok(names
            .iter()
            .filter_map(|name| tables.groups.get(name))
            .map(Membership::from)
            .collect())
    }

    fn insert_group(&self, group: Group) -> Result<(), IdentityStoreError> {
        let mut tables = self.write()?;
        if tables.groups.contains_key(group.name()) {
            return Err(IdentityStoreError::Duplicate(format!("group '{}'", group.name())));
        }
        tables.groups.insert(group.name().clone(), group);
        Ok(())
    }

    fn remove_group(&self, name: &GroupName) -> Result<bool, IdentityStoreError> {
        let mut tables = self.write()?;
        if tables.groups.remove(name).is_none() {
            return Ok(false);
        }
        for names in tables.memberships.values_mut() {
            names.remove(name);
        }
        Ok(true)
    }

    fn managed_groups(&self, manager: &GroupName) -> Result<Vec<GroupName>, IdentityStoreError> {
        let tables = self.read()?;
        let mut managed: Vec<GroupName> = tables
            .groups
            .values()
            .filter(|g| g.manager() == Some(manager))
            .map(|g| g.name().clone())
            .collect();
        managed.sort();
        Ok(managed)
    }

    fn insert_user(&self, user: User, groups: &[GroupName]) -> Result<(), IdentityStoreError> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.username) {
            return Err(IdentityStoreError::Duplicate(format!("user '{}'", user.username)));
        }
        if let Some(missing) = groups.iter().find(|g| !tables.groups.contains_key(*g)) {
            return Err(IdentityStoreError::UnknownGroup(missing.to_string()));
        }

        let username = user.username.clone();
        tables.users.insert(username.clone(), user);
        tables
            .memberships
            .insert(username, groups.iter().cloned().collect());
        Ok(())
    }

    fn remove_user(&self, username: &Username) -> Result<bool, IdentityStoreError> {
        let mut tables = self.write()?;
        tables.memberships.remove(username);
        Ok(tables.users.remove(username).is_some())
    }
}
