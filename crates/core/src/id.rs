//! Strongly-typed identifiers used across the workspace.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Privilege rank of a group. Lower values denote greater privilege; `0` is
/// the most privileged rank.
pub type Level = u32;

/// Maximum length of a username or group name, in characters.
pub const NAME_MAX_LEN: usize = 50;

/// Unique identifier of a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

/// Unique identifier of a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

fn validate_name(kind: &str, raw: &str) -> Result<(), DomainError> {
    if raw.is_empty() {
        return Err(DomainError::invalid_id(format!("{kind}: must not be empty")));
    }
    if raw.chars().count() > NAME_MAX_LEN {
        return Err(DomainError::invalid_id(format!(
            "{kind}: longer than {NAME_MAX_LEN} characters"
        )));
    }
    // `.` separates registry namespaces from token ids.
    if raw.chars().any(|c| c.is_whitespace() || c == '.') {
        return Err(DomainError::invalid_id(format!(
            "{kind}: '{raw}' contains whitespace or '.'"
        )));
    }
    Ok(())
}

macro_rules! impl_name_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Parse and validate a name.
            pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
                let raw = raw.into();
                validate_name($name, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl TryFrom<&str> for $t {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_name_newtype!(Username, "Username");
impl_name_newtype!(GroupName, "GroupName");

/// Unique identifier of one issued token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jti(Uuid);

impl Jti {
    /// Create a new random token identifier (UUIDv4). Never reused.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Jti {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for Jti {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for Jti {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for Jti {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("Jti: {e}")))?;
        Ok(Self(uuid))
    }
}
