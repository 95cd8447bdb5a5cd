//! Authorization policies: what a caller must be, and what token they must hold.

use serde::{Deserialize, Serialize};

use tessera_core::{GroupName, Level};

use crate::{Denied, TokenKind};

/// Token predicate a guard enforces before the group/level decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRequirement {
    /// Any valid access token, fresh or not.
    #[default]
    Access,
    /// An access token minted directly from a credential check.
    FreshAccess,
    /// A refresh token.
    Refresh,
}

impl TokenRequirement {
    /// Kind is checked before freshness, so a refresh token presented where a
    /// fresh access token is needed reports the wrong kind.
    pub fn check(self, kind: TokenKind, fresh: bool) -> Result<(), Denied> {
        let expected = match self {
            TokenRequirement::Access | TokenRequirement::FreshAccess => TokenKind::Access,
            TokenRequirement::Refresh => TokenKind::Refresh,
        };
        if kind != expected {
            return Err(Denied::WrongTokenKind {
                expected,
                actual: kind,
            });
        }
        if self == TokenRequirement::FreshAccess && !fresh {
            return Err(Denied::StaleToken);
        }
        Ok(())
    }
}

/// Classes of operations and the token each one demands.
///
/// | class | token |
/// |---|---|
/// | `Read` | any access token |
/// | `Write` | fresh access token |
/// | `Administer` | fresh access token |
/// | `Introspect` | fresh access token, level 0 |
/// | `Refresh` | refresh token |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
    Administer,
    Introspect,
    Refresh,
}

impl OperationClass {
    pub const fn token_requirement(self) -> TokenRequirement {
        match self {
            OperationClass::Read => TokenRequirement::Access,
            OperationClass::Write | OperationClass::Administer | OperationClass::Introspect => {
                TokenRequirement::FreshAccess
            }
            OperationClass::Refresh => TokenRequirement::Refresh,
        }
    }

    pub const fn required_level(self) -> Option<Level> {
        match self {
            OperationClass::Introspect => Some(0),
            _ => None,
        }
    }
}

/// A composable authorization requirement.
///
/// Group and level requirements combine with logical AND. A policy with
/// neither admits any authenticated caller.
///
/// A `None` group entry means "the manager of something that has none": no
/// caller can satisfy it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    groups: Vec<Option<GroupName>>,
    level: Option<Level>,
    managers: bool,
    token: TokenRequirement,
}

impl Policy {
    /// Any authenticated caller holding an access token.
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Baseline policy for an operation class (token requirement and any
    /// class-wide level).
    pub fn for_operation(class: OperationClass) -> Self {
        Self {
            level: class.required_level(),
            token: class.token_requirement(),
            ..Self::default()
        }
    }

    /// Require membership in `group` or any group in its management closure.
    pub fn group(mut self, group: GroupName) -> Self {
        self.groups.push(Some(group));
        self
    }

    pub fn groups(mut self, groups: impl IntoIterator<Item = GroupName>) -> Self {
        self.groups.extend(groups.into_iter().map(Some));
        self
    }

    /// Like [`Policy::group`], but `None` denies everyone.
    pub fn managed_by(mut self, group: Option<GroupName>) -> Self {
        self.groups.push(group);
        self
    }

    /// Require a membership at `level` or more privileged. Keeps the most
    /// restrictive level when called more than once.
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(self.level.map_or(level, |current| current.min(level)));
        self
    }

    /// Check against the managers of the required groups instead of the
    /// groups themselves.
    pub fn managers(mut self) -> Self {
        self.managers = true;
        self
    }

    pub fn fresh(mut self) -> Self {
        self.token = TokenRequirement::FreshAccess;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.token = TokenRequirement::Refresh;
        self
    }

    pub fn with_token(mut self, token: TokenRequirement) -> Self {
        self.token = token;
        self
    }

    pub fn required_groups(&self) -> &[Option<GroupName>] {
        &self.groups
    }

    pub fn required_level(&self) -> Option<Level> {
        self.level
    }

    pub fn managers_only(&self) -> bool {
        self.managers
    }

    pub fn token(&self) -> TokenRequirement {
        self.token
    }
}
