//! Revocation registry boundary: a TTL key-value store of live tokens.
//!
//! Presence of `<namespace>.<jti>` means the token is live. Absence means it
//! was revoked or its entry expired; the two are indistinguishable.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod r#trait;

pub use in_memory::InMemoryRevocationRegistry;
#[cfg(feature = "redis")]
pub use redis::RedisRevocationRegistry;
pub use r#trait::{RegistryError, RevocationRegistry};
