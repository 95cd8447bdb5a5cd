//! Identity store boundary: users, groups, and the memberships between them.
//!
//! The authorization engine only reads through [`tessera_auth::GroupSource`];
//! the write half exists for the admin service.

pub mod in_memory;
pub mod password;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryIdentityStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresIdentityStore;
pub use r#trait::{IdentityStore, IdentityStoreError, User};
