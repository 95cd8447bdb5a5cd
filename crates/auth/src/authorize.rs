use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use tessera_core::{GroupName, Level, Username};

use crate::{
    Caller, GroupHierarchy, GroupSource, GroupSourceError, HierarchyError, IntegrityViolation,
    Policy, TokenKind,
};

/// Machine-checkable denial code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialKind {
    InsufficientClearance,
    NotInAuthorizedGroup,
    NoEligibleActor,
    StaleToken,
    WrongTokenKind,
    RevokedOrExpired,
}

impl DenialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialKind::InsufficientClearance => "insufficient-clearance",
            DenialKind::NotInAuthorizedGroup => "not-in-authorized-group",
            DenialKind::NoEligibleActor => "no-eligible-actor",
            DenialKind::StaleToken => "stale-token",
            DenialKind::WrongTokenKind => "wrong-token-kind",
            DenialKind::RevokedOrExpired => "revoked-or-expired",
        }
    }
}

impl core::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal, non-retryable refusal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Denied {
    #[error("the user '{username}' cannot access level {required}")]
    InsufficientClearance { username: Username, required: Level },

    #[error("only users grouped in {allowed:?} are allowed; '{username}' is in {actual:?}")]
    NotInAuthorizedGroup {
        username: Username,
        allowed: Vec<GroupName>,
        actual: Vec<GroupName>,
    },

    #[error("no user can perform this action")]
    NoEligibleActor,

    #[error("a fresh token is required")]
    StaleToken,

    #[error("expected a {expected} token, got {actual}")]
    WrongTokenKind { expected: TokenKind, actual: TokenKind },

    #[error("token has been revoked or has expired")]
    RevokedOrExpired,
}

impl Denied {
    pub fn kind(&self) -> DenialKind {
        match self {
            Denied::InsufficientClearance { .. } => DenialKind::InsufficientClearance,
            Denied::NotInAuthorizedGroup { .. } => DenialKind::NotInAuthorizedGroup,
            Denied::NoEligibleActor => DenialKind::NoEligibleActor,
            Denied::StaleToken => DenialKind::StaleToken,
            Denied::WrongTokenKind { .. } => DenialKind::WrongTokenKind,
            Denied::RevokedOrExpired => DenialKind::RevokedOrExpired,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("denied: {0}")]
    Denied(#[from] Denied),

    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error(transparent)]
    Source(#[from] GroupSourceError),
}

impl AuthzError {
    pub fn denial(&self) -> Option<&Denied> {
        match self {
            AuthzError::Denied(d) => Some(d),
            _ => None,
        }
    }
}

impl From<HierarchyError> for AuthzError {
    fn from(value: HierarchyError) -> Self {
        match value {
            HierarchyError::Integrity(e) => AuthzError::Integrity(e),
            HierarchyError::Source(e) => AuthzError::Source(e),
        }
    }
}

/// Outcome of evaluating a policy, before it is turned into a gate or a
/// predicate.
struct Evaluation {
    allowed_groups: Vec<GroupName>,
    outcome: Result<(), Denied>,
}

/// The single authorization call site.
///
/// Stateless apart from the hierarchy cache; share one instance (e.g. behind
/// an `Arc`) across request handlers.
#[derive(Debug)]
pub struct Authorizer<S> {
    hierarchy: GroupHierarchy<S>,
}

impl<S> Authorizer<S>
where
    S: GroupSource,
{
    pub fn new(hierarchy: GroupHierarchy<S>) -> Self {
        Self { hierarchy }
    }

    pub fn hierarchy(&self) -> &GroupHierarchy<S> {
        &self.hierarchy
    }

    /// Gate: `Ok(())` or the reason for refusal.
    ///
    /// The policy's token requirement is not checked here; token guards do
    /// that before resolving the caller.
    pub fn authorize(&self, caller: &Caller, policy: &Policy) -> Result<(), AuthzError> {
        let evaluation = self.evaluate(caller, policy)?;
        if let Err(denied) = &evaluation.outcome {
            debug!(
                caller = %caller.username(),
                reason = %denied.kind(),
                "authorization denied"
            );
        }
        evaluation.outcome.map_err(AuthzError::from)
    }

    /// Predicate: `true` only when [`Authorizer::authorize`] would allow.
    ///
    /// Integrity and store failures fail closed and are logged.
    pub fn is_authorized(&self, caller: &Caller, policy: &Policy) -> bool {
        match self.authorize(caller, policy) {
            Ok(()) => true,
            Err(AuthzError::Denied(_)) => false,
            Err(e) => {
                warn!(caller = %caller.username(), error = %e, "authorization check failed closed");
                false
            }
        }
    }

    /// Explain why a decision was made (or would be made).
    pub fn explain(
        &self,
        caller: &Caller,
        policy: &Policy,
    ) -> Result<AuthorizationExplanation, AuthzError> {
        let evaluation = self.evaluate(caller, policy)?;
        let (granted, reason, denial) = match &evaluation.outcome {
            Ok(()) => (true, "allowed".to_string(), None),
            Err(d) => (false, d.to_string(), Some(d.kind())),
        };

        Ok(AuthorizationExplanation {
            caller: caller.username().clone(),
            granted,
            reason,
            denial,
            required_level: policy.required_level(),
            allowed_groups: evaluation.allowed_groups,
            caller_groups: caller.groups(),
            caller_clearance: caller.clearance(),
        })
    }

    fn evaluate(&self, caller: &Caller, policy: &Policy) -> Result<Evaluation, AuthzError> {
        let required = self.effective_groups(policy)?;

        let Some(required) = required else {
            return Ok(Evaluation {
                allowed_groups: Vec::new(),
                outcome: Err(Denied::NoEligibleActor),
            });
        };

        let mut allowed_groups = Vec::new();
        for group in &required {
            for member in self.hierarchy.management_closure(group)?.iter() {
                if !allowed_groups.contains(member) {
                    allowed_groups.push(member.clone());
                }
            }
        }

        if let Some(required_level) = policy.required_level() {
            if !caller.memberships().iter().any(|m| m.level <= required_level) {
                return Ok(Evaluation {
                    allowed_groups,
                    outcome: Err(Denied::InsufficientClearance {
                        username: caller.username().clone(),
                        required: required_level,
                    }),
                });
            }
        }

        if !required.is_empty()
            && !caller
                .memberships()
                .iter()
                .any(|m| allowed_groups.contains(&m.group))
        {
            let outcome = Err(Denied::NotInAuthorizedGroup {
                username: caller.username().clone(),
                allowed: allowed_groups.clone(),
                actual: caller.groups(),
            });
            return Ok(Evaluation {
                allowed_groups,
                outcome,
            });
        }

        Ok(Evaluation {
            allowed_groups,
            outcome: Ok(()),
        })
    }

    /// The groups to check membership against, or `None` when some entry has
    /// no eligible group (the policy can never be satisfied).
    fn effective_groups(&self, policy: &Policy) -> Result<Option<Vec<GroupName>>, AuthzError> {
        let mut resolved = Vec::with_capacity(policy.required_groups().len());

        for entry in policy.required_groups() {
            let Some(name) = entry else {
                return Ok(None);
            };

            if !policy.managers_only() {
                resolved.push(name.clone());
                continue;
            }

            let manager = self
                .hierarchy
                .group(name)?
                .and_then(|group| group.manager().cloned());
            match manager {
                Some(manager) => resolved.push(manager),
                None => return Ok(None),
            }
        }

        Ok(Some(resolved))
    }
}

/// Auditable account of one authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub caller: Username,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub denial: Option<DenialKind>,
    pub required_level: Option<Level>,
    /// Union of the management closures of the required groups.
    pub allowed_groups: Vec<GroupName>,
    pub caller_groups: Vec<GroupName>,
    pub caller_clearance: Option<Level>,
}
