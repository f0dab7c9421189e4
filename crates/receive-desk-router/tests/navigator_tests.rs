//! Integration tests for navigation with redirects and superseded requests.

use std::sync::Arc;

use receive_desk_core::{PermissionSet, RECEIVE_SCREEN, UserIdentity};
use receive_desk_router::{NavigationOutcome, Navigator, RouteTable};
use receive_desk_session::SessionStore;

fn navigator() -> (Navigator, Arc<SessionStore>) {
    let store = Arc::new(SessionStore::in_memory());
    (
        Navigator::new(RouteTable::standard(), Arc::clone(&store)),
        store,
    )
}

fn arrived_name(outcome: &NavigationOutcome) -> Option<&str> {
    match outcome {
        NavigationOutcome::Arrived { route, .. } => route.name.as_deref(),
        _ => None,
    }
}

#[test_log::test]
fn navigator_tests_anonymous_user_lands_on_login() {
    let (navigator, _store) = navigator();

    let outcome = navigator.navigate("/pages/permissions");

    assert_eq!(arrived_name(&outcome), Some("login"));
    match outcome {
        NavigationOutcome::Arrived {
            redirected_from, ..
        } => assert_eq!(redirected_from.as_deref(), Some("/pages/permissions")),
        other => panic!("expected arrival, got {other:?}"),
    }
}

#[test_log::test]
fn navigator_tests_signed_in_login_request_lands_on_dashboard() {
    let (navigator, store) = navigator();
    store
        .put(&UserIdentity::new("U1"), &PermissionSet::new())
        .expect("session should persist");

    let outcome = navigator.navigate("/auth/login");

    assert_eq!(arrived_name(&outcome), Some("dashboard"));
    assert_eq!(
        navigator.current().and_then(|route| route.name),
        Some("dashboard".to_string())
    );
}

#[test_log::test]
fn navigator_tests_missing_permission_lands_on_access_denied() {
    let (navigator, store) = navigator();
    store
        .put(&UserIdentity::new("U1"), &PermissionSet::from_iter([(RECEIVE_SCREEN, "1")]))
        .expect("session should persist");

    assert_eq!(
        arrived_name(&navigator.navigate("/pages/receivehistory")),
        Some("accessDenied")
    );
    assert_eq!(
        arrived_name(&navigator.navigate("/pages/receivedoc")),
        Some("receivedoc")
    );
}

#[test_log::test]
fn navigator_tests_unknown_path_lands_on_not_found() {
    let (navigator, _store) = navigator();
    assert_eq!(
        arrived_name(&navigator.navigate("/no/such/page")),
        Some("notfound")
    );
}

#[test_log::test]
fn navigator_tests_stale_ticket_does_not_override_newer_target() {
    let (navigator, store) = navigator();
    store
        .put(&UserIdentity::new("U1"), &PermissionSet::from_iter([(RECEIVE_SCREEN, "1")]))
        .expect("session should persist");

    let stale = navigator.request("/pages/receivedoc");
    let fresh = navigator.request("/pages/crud");

    assert_eq!(arrived_name(&navigator.resolve(&fresh)), Some("crud"));
    assert_eq!(navigator.resolve(&stale), NavigationOutcome::Superseded);
    assert_eq!(
        navigator.current().and_then(|route| route.name),
        Some("crud".to_string())
    );
}

#[test_log::test]
fn navigator_tests_session_change_is_seen_by_next_navigation() {
    let (navigator, store) = navigator();
    assert_eq!(arrived_name(&navigator.navigate("/pages/crud")), Some("login"));

    store
        .put(&UserIdentity::new("U1"), &PermissionSet::new())
        .expect("session should persist");
    assert_eq!(arrived_name(&navigator.navigate("/pages/crud")), Some("crud"));

    store.clear().expect("logout should succeed");
    assert_eq!(arrived_name(&navigator.navigate("/pages/crud")), Some("login"));
}
