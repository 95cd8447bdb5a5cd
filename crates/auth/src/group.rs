//! Groups, memberships, and the structural invariants between them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_core::{GroupName, Level};

/// A node in the management forest.
///
/// # Invariants
/// - If a group has a manager, the manager's level is strictly lower (more
///   privileged) than the group's level.
/// - Following `manager` links terminates at a root (no cycles).
///
/// The first invariant is checked by [`Group::new`]. The second can only be
/// checked against the whole forest, which [`crate::GroupHierarchy`] does on
/// every closure walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    name: GroupName,
    level: Level,
    manager: Option<GroupName>,
}

impl Group {
    /// A group without a manager (a root of the forest).
    pub fn root(name: GroupName, level: Level) -> Self {
        Self {
            name,
            level,
            manager: None,
        }
    }

    /// Create a group under `manager`, enforcing the level ordering.
    pub fn new(
        name: GroupName,
        level: Level,
        manager: Option<&Group>,
    ) -> Result<Self, IntegrityViolation> {
        let Some(manager) = manager else {
            return Ok(Self::root(name, level));
        };

        if manager.level >= level {
            return Err(IntegrityViolation::LevelOrdering {
                group: name,
                level,
                manager: manager.name.clone(),
                manager_level: manager.level,
            });
        }

        Ok(Self {
            name,
            level,
            manager: Some(manager.name.clone()),
        })
    }

    /// Rehydrate a group from persisted state without re-checking invariants.
    ///
    /// Stores use this when loading rows; data written through [`Group::new`]
    /// already satisfied the ordering at creation time.
    pub fn from_parts(name: GroupName, level: Level, manager: Option<GroupName>) -> Self {
        Self {
            name,
            level,
            manager,
        }
    }

    pub fn name(&self) -> &GroupName {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn manager(&self) -> Option<&GroupName> {
        self.manager.as_ref()
    }
}

/// A user's membership in one group, with the group's level resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub group: GroupName,
    pub level: Level,
}

impl Membership {
    pub fn new(group: GroupName, level: Level) -> Self {
        Self { group, level }
    }
}

impl From<&Group> for Membership {
    fn from(group: &Group) -> Self {
        Self {
            group: group.name.clone(),
            level: group.level,
        }
    }
}

/// The group structure is corrupt.
///
/// This indicates a bug in whatever wrote the identity store, not a normal
/// authorization outcome. Callers should treat it as a configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    #[error("management chain of '{group}' does not terminate within {depth} hops")]
    Cycle { group: GroupName, depth: usize },

    #[error("manager '{manager}' (level {manager_level}) cannot manage level {level} group '{group}'")]
    LevelOrdering {
        group: GroupName,
        level: Level,
        manager: GroupName,
        manager_level: Level,
    },

    #[error("group '{group}' names unknown manager '{manager}'")]
    UnknownManager { group: GroupName, manager: GroupName },
}
