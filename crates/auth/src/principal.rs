use serde::{Deserialize, Serialize};

use tessera_core::{GroupName, Level, Username};

use crate::Membership;

/// A fully resolved caller for authorization decisions.
///
/// Construction is decoupled from storage and transport: the token layer
/// decodes the identity and asks the identity store for memberships, then
/// passes this value explicitly to every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    username: Username,
    memberships: Vec<Membership>,
}

impl Caller {
    pub fn new(username: Username, memberships: Vec<Membership>) -> Self {
        Self {
            username,
            memberships,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    /// Names of the groups the caller belongs to, in membership order.
    pub fn groups(&self) -> Vec<GroupName> {
        self.memberships.iter().map(|m| m.group.clone()).collect()
    }

    /// The most privileged level across all memberships.
    pub fn clearance(&self) -> Option<Level> {
        self.memberships.iter().map(|m| m.level).min()
    }

    pub fn is_member_of(&self, group: &GroupName) -> bool {
        self.memberships.iter().any(|m| &m.group == group)
    }
}
