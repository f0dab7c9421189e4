//! Integration tests for guard rule precedence.

use receive_desk_core::{
    ADMIN_SCREEN, HISTORY_SCREEN, PermissionSet, RECEIVE_SCREEN, SessionState, UserIdentity,
};
use receive_desk_router::{
    ACCESS_DENIED_ROUTE, GuardDecision, HOME_PATH, LOGIN_ROUTE, RouteAccess, RouteRequirement,
    RouteTable, RouteTarget, evaluate,
};

fn signed_in(user_code: &str, flags: &[(&str, &str)]) -> SessionState {
    SessionState {
        identity: Some(UserIdentity::new(user_code)),
        permissions: Some(flags.iter().copied().collect::<PermissionSet>()),
        login_context: None,
    }
}

fn auth_and_admin() -> RouteRequirement {
    RouteRequirement::aggregate(&[RouteAccess::authenticated().with_admin()])
}

fn denied() -> GuardDecision {
    GuardDecision::Redirect(RouteTarget::name(ACCESS_DENIED_ROUTE))
}

#[test]
fn navigation_guard_tests_anonymous_admin_request_goes_to_login() {
    let decision = evaluate(&auth_and_admin(), false, &SessionState::anonymous());
    assert_eq!(
        decision,
        GuardDecision::Redirect(RouteTarget::name(LOGIN_ROUTE))
    );
}

#[test]
fn navigation_guard_tests_signed_in_without_admin_is_denied() {
    let session = signed_in("U1", &[(RECEIVE_SCREEN, "1"), (ADMIN_SCREEN, "0")]);
    assert_eq!(evaluate(&auth_and_admin(), false, &session), denied());
}

#[test]
fn navigation_guard_tests_superadmin_any_casing_bypasses_admin_flag() {
    for user_code in ["superadmin", "SUPERADMIN", "SuperAdmin"] {
        let session = signed_in(user_code, &[]);
        assert_eq!(
            evaluate(&auth_and_admin(), false, &session),
            GuardDecision::Allow,
            "{user_code} should be allowed"
        );
    }
}

#[test]
fn navigation_guard_tests_admin_screen_flag_allows_admin_route() {
    let session = signed_in("U2", &[(ADMIN_SCREEN, "1")]);
    assert_eq!(evaluate(&auth_and_admin(), false, &session), GuardDecision::Allow);
}

#[test]
fn navigation_guard_tests_chain_history_requirement_is_aggregated() {
    let requirement = RouteRequirement::aggregate(&[
        RouteAccess::authenticated(),
        RouteAccess::public().with_history(),
    ]);
    let session = signed_in("U1", &[(HISTORY_SCREEN, "0")]);

    assert!(requirement.requires_session);
    assert_eq!(requirement.required_permissions, vec![HISTORY_SCREEN]);
    assert_eq!(evaluate(&requirement, false, &session), denied());
}

#[test]
fn navigation_guard_tests_login_route_while_signed_in_goes_home() {
    let table = RouteTable::standard();
    let login = table.resolve("/auth/login");
    assert!(login.is_login());

    let decision = evaluate(&login.requirement(), true, &signed_in("U1", &[]));
    assert_eq!(decision, GuardDecision::Redirect(RouteTarget::path(HOME_PATH)));

    let anonymous = evaluate(&login.requirement(), true, &SessionState::anonymous());
    assert_eq!(anonymous, GuardDecision::Allow);
}

#[test]
fn navigation_guard_tests_unknown_permission_key_is_denied() {
    let requirement =
        RouteRequirement::aggregate(&[RouteAccess::authenticated().with_permission("stock_count")]);
    let session = signed_in("U1", &[(RECEIVE_SCREEN, "1")]);

    assert_eq!(evaluate(&requirement, false, &session), denied());
}

#[test]
fn navigation_guard_tests_public_route_allows_anonymous() {
    let table = RouteTable::standard();
    for path in ["/landing", "/auth/access", "/auth/error", "/pages/notfound"] {
        let route = table.resolve(path);
        assert_eq!(
            evaluate(&route.requirement(), route.is_login(), &SessionState::anonymous()),
            GuardDecision::Allow,
            "{path} should be public"
        );
    }
}

#[test]
fn navigation_guard_tests_standard_table_declares_expected_requirements() {
    let table = RouteTable::standard();

    let receive_item = table.resolve("/pages/receiveitem/RCD20240101000000-0001");
    assert_eq!(receive_item.name.as_deref(), Some("receiveitem"));
    assert_eq!(receive_item.param("docno"), Some("RCD20240101000000-0001"));
    assert_eq!(
        receive_item.requirement().required_permissions,
        vec![RECEIVE_SCREEN]
    );

    let permissions = table.resolve("/pages/permissions").requirement();
    assert!(permissions.requires_session);
    assert!(permissions.requires_admin);

    let history = table.resolve("/pages/receivehistory").requirement();
    assert_eq!(history.required_permissions, vec![HISTORY_SCREEN]);

    let crud = table.resolve("/pages/crud").requirement();
    assert!(crud.requires_session);
    assert!(crud.required_permissions.is_empty());
}
