//! `tessera-core`: identity and authorization primitives.
//!
//! This crate contains **pure** value types (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{GroupName, Jti, Level, Username, NAME_MAX_LEN};
