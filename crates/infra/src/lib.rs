//! Infrastructure layer: stores, token lifecycle and administration.

pub mod admin;
pub mod config;
pub mod identity;
pub mod registry;
pub mod stack;
pub mod tokens;

#[cfg(test)]
mod integration_tests;

pub use admin::{AdminError, AdminService};
pub use config::{AuthSettings, ConfigError};
pub use identity::{IdentityStore, IdentityStoreError, InMemoryIdentityStore, User};
pub use registry::{InMemoryRevocationRegistry, RegistryError, RevocationRegistry};
pub use stack::AuthStack;
pub use tokens::{IssuedToken, TokenError, TokenPair, TokenService, TokenSettings};
