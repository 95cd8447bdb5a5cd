//! `tessera-auth`: pure authorization engine over a hierarchical group forest.
//!
//! This crate is intentionally decoupled from HTTP and storage. Group lookups
//! come in through [`GroupSource`] and callers are passed in explicitly.
//! A [`TokenCodec`] never touches the revocation registry.

pub mod authorize;
pub mod claims;
pub mod codec;
pub mod group;
pub mod hierarchy;
pub mod policy;
pub mod principal;

pub use authorize::{AuthorizationExplanation, Authorizer, AuthzError, Denied, DenialKind};
pub use claims::{TokenClaims, TokenKind, TokenValidationError, validate_claims};
pub use codec::{Hs256TokenCodec, TokenCodec};
pub use group::{Group, IntegrityViolation, Membership};
pub use hierarchy::{DEFAULT_MAX_DEPTH, GroupHierarchy, GroupSource, GroupSourceError, HierarchyError};
pub use policy::{OperationClass, Policy, TokenRequirement};
pub use principal::Caller;
