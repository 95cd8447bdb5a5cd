//! Integration tests for the full pipeline.
//!
//! Tests: login → guard → admin write → hierarchy → revoke
//!
//! Verifies:
//! - Admin writes become visible to authorization immediately
//! - Revocation and registry expiry produce the same denial
//! - Introspection is limited to fresh level-0 callers

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tessera_auth::{DenialKind, OperationClass, Policy, TokenKind};
    use tessera_core::{GroupName, Username};

    use crate::config::AuthSettings;
    use crate::identity::InMemoryIdentityStore;
    use crate::registry::{InMemoryRevocationRegistry, RevocationRegistry};
    use crate::stack::AuthStack;
    use crate::tokens::TokenError;

    type Stack = AuthStack<Arc<InMemoryIdentityStore>, Arc<InMemoryRevocationRegistry>>;

    fn group(s: &str) -> GroupName {
        GroupName::parse(s).unwrap()
    }

    fn user(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    fn denial(err: TokenError) -> DenialKind {
        err.denial().expect("expected a denial").kind()
    }

    fn administer() -> Policy {
        Policy::for_operation(OperationClass::Administer)
    }

    /// Bootstrapped stack with root → ops → oncall, `olga` in ops and `alice`
    /// in oncall.
    fn setup() -> (Stack, Arc<InMemoryRevocationRegistry>) {
        let settings = AuthSettings {
            jwt_secret: "integration-secret".to_string(),
            ..AuthSettings::default()
        };
        let registry = Arc::new(InMemoryRevocationRegistry::new());
        let mut stack = AuthStack::new(Arc::new(InMemoryIdentityStore::new()), registry.clone(), &settings)
            .unwrap();
        stack.admin = stack.admin.with_password_cost(4);
        stack.admin.bootstrap("rootpw").unwrap();

        let root = stack.tokens.login(&user("root"), "rootpw").unwrap();
        let caller = stack.tokens.require_fresh(&root.access.token, &administer()).unwrap();

        stack
            .admin
            .create_group(&caller, group("ops"), 1, Some(group("root")))
            .unwrap();
        stack
            .admin
            .create_group(&caller, group("oncall"), 2, Some(group("ops")))
            .unwrap();
        stack
            .admin
            .create_user(&caller, user("olga"), "olgapw", vec![group("ops")])
            .unwrap();
        stack
            .admin
            .create_user(&caller, user("alice"), "alicepw", vec![group("oncall")])
            .unwrap();

        stack.tokens.logout(&root.access.token).unwrap();
        stack.tokens.revoke(&root.refresh.claims.jti).unwrap();
        (stack, registry)
    }

    #[test]
    fn alice_on_oncall() {
        let (stack, _) = setup();
        let alice = stack
            .tokens
            .issue(&user("alice"), "alicepw", TokenKind::Access)
            .unwrap();

        let oncall = Policy::authenticated().group(group("oncall"));
        let ops = Policy::authenticated().group(group("ops"));

        assert!(stack.tokens.require_access(&alice.token, &oncall).is_ok());
        assert_eq!(
            denial(stack.tokens.require_access(&alice.token, &ops).unwrap_err()),
            DenialKind::NotInAuthorizedGroup
        );
        assert!(
            stack
                .tokens
                .require_access(&alice.token, &Policy::authenticated().level(2))
                .is_ok()
        );
        assert_eq!(
            denial(
                stack
                    .tokens
                    .require_access(&alice.token, &Policy::authenticated().level(1))
                    .unwrap_err()
            ),
            DenialKind::InsufficientClearance
        );
    }

    #[test]
    fn managers_can_administer_below_themselves() {
        let (stack, _) = setup();
        let olga = stack.tokens.login(&user("olga"), "olgapw").unwrap();
        let caller = stack.tokens.require_fresh(&olga.access.token, &administer()).unwrap();

        stack
            .admin
            .create_group(&caller, group("pager"), 3, Some(group("oncall")))
            .unwrap();
        stack
            .admin
            .create_user(&caller, user("bob"), "bobpw", vec![group("pager")])
            .unwrap();

        let bob = stack.tokens.login(&user("bob"), "bobpw").unwrap();
        let pager_or_above = Policy::authenticated().group(group("pager"));
        assert!(stack.tokens.require_access(&bob.access.token, &pager_or_above).is_ok());
        assert!(stack.tokens.require_access(&olga.access.token, &pager_or_above).is_ok());

        // Olga is not a manager of `ops` itself.
        assert_eq!(
            stack
                .admin
                .delete_group(&caller, &group("ops"))
                .unwrap_err()
                .denial()
                .map(|d| d.kind()),
            Some(DenialKind::NotInAuthorizedGroup)
        );
    }

    #[test]
    fn deleted_group_drops_out_of_authorization() {
        let (stack, _) = setup();
        let root = stack.tokens.login(&user("root"), "rootpw").unwrap();
        let admin = stack.tokens.require_fresh(&root.access.token, &administer()).unwrap();
        let alice = stack.tokens.login(&user("alice"), "alicepw").unwrap();
        let oncall = Policy::authenticated().group(group("oncall"));

        assert!(stack.tokens.require_access(&alice.access.token, &oncall).is_ok());
        stack.admin.delete_group(&admin, &group("oncall")).unwrap();
        assert_eq!(
            denial(stack.tokens.require_access(&alice.access.token, &oncall).unwrap_err()),
            DenialKind::NotInAuthorizedGroup
        );
    }

    #[test]
    fn administering_needs_a_fresh_token() {
        let (stack, _) = setup();
        let olga = stack.tokens.login(&user("olga"), "olgapw").unwrap();
        let stale = stack.tokens.refresh(&olga.refresh.token).unwrap();

        assert_eq!(
            denial(stack.tokens.require(&stale.token, &administer()).unwrap_err()),
            DenialKind::StaleToken
        );
        assert!(
            stack
                .tokens
                .require(&stale.token, &Policy::for_operation(OperationClass::Read))
                .is_ok()
        );
    }

    #[test]
    fn registry_expiry_looks_like_revocation() {
        let (stack, registry) = setup();
        let revoked = stack
            .tokens
            .issue(&user("alice"), "alicepw", TokenKind::Access)
            .unwrap();
        let expiring = stack
            .tokens
            .issue(&user("alice"), "alicepw", TokenKind::Access)
            .unwrap();
        let long_lived = stack
            .tokens
            .issue(&user("alice"), "alicepw", TokenKind::Refresh)
            .unwrap();

        stack.tokens.revoke(&revoked.claims.jti).unwrap();

        let ttl = stack.tokens.settings().registry_ttl(Duration::from_secs(900)).unwrap();
        registry.advance_clock(ttl);

        let revoked_err = stack.tokens.check_valid(&revoked.token).unwrap_err();
        let expired_err = stack.tokens.check_valid(&expiring.token).unwrap_err();
        assert_eq!(denial(revoked_err), DenialKind::RevokedOrExpired);
        assert_eq!(denial(expired_err), DenialKind::RevokedOrExpired);

        assert!(stack.tokens.check_valid(&long_lived.token).is_ok());
    }

    #[test]
    fn introspection_lists_every_live_token() {
        let (stack, registry) = setup();
        let root = stack.tokens.login(&user("root"), "rootpw").unwrap();
        let alice = stack
            .tokens
            .issue(&user("alice"), "alicepw", TokenKind::Access)
            .unwrap();

        let active = stack.tokens.list_active(&root.access.token).unwrap();
        let jtis: Vec<_> = active.iter().map(|(jti, _)| *jti).collect();
        assert_eq!(active.len(), 3);
        assert!(jtis.contains(&root.access.claims.jti));
        assert!(jtis.contains(&alice.claims.jti));
        assert_eq!(registry.scan_prefix("auth.live.").unwrap().len(), 3);

        stack.tokens.revoke(&alice.claims.jti).unwrap();
        assert_eq!(stack.tokens.list_active(&root.access.token).unwrap().len(), 2);

        let olga = stack.tokens.login(&user("olga"), "olgapw").unwrap();
        assert_eq!(
            denial(stack.tokens.list_active(&olga.access.token).unwrap_err()),
            DenialKind::InsufficientClearance
        );
    }

    #[test]
    fn deleted_users_can_no_longer_use_their_tokens() {
        let (stack, _) = setup();
        let root = stack.tokens.login(&user("root"), "rootpw").unwrap();
        let admin = stack.tokens.require_fresh(&root.access.token, &administer()).unwrap();
        let alice = stack.tokens.login(&user("alice"), "alicepw").unwrap();

        stack.admin.delete_user(&admin, &user("alice")).unwrap();

        assert!(matches!(
            stack.tokens.require_access(&alice.access.token, &Policy::authenticated()),
            Err(TokenError::Authentication)
        ));
        assert!(matches!(
            stack.tokens.refresh(&alice.refresh.token),
            Err(TokenError::Authentication)
        ));
    }
}
