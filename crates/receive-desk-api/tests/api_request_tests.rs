//! Integration tests for request construction and login-context scoping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use receive_desk_api::{ApiClient, ApiConfig, ApiError};
use receive_desk_auth::{AuthApi, AuthError};
use receive_desk_core::{Credentials, DocListQuery, LoginContext};
use receive_desk_session::SessionStore;
use reqwest::Method;

fn client_with(store: Arc<SessionStore>) -> ApiClient {
    let config = ApiConfig::new("https://api.example.test/receive").expect("config is valid");
    ApiClient::new(config, store).expect("client builds")
}

fn signed_in_client() -> ApiClient {
    let store = Arc::new(SessionStore::in_memory());
    store
        .put_login_context(&LoginContext::new("PROV", "DB1"))
        .expect("context stored");
    client_with(store)
}

fn query_of(request: &reqwest::Request) -> BTreeMap<String, String> {
    request
        .url()
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

#[test]
fn api_request_tests_endpoints_join_under_base_path() {
    let client = signed_in_client();
    let request = client
        .build_request(Method::GET, "getReceiveDocList", &[])
        .expect("request builds");

    assert_eq!(
        request.url().as_str(),
        "https://api.example.test/receive/getReceiveDocList"
    );
}

#[test]
fn api_request_tests_tenant_query_uses_stored_context() {
    let client = signed_in_client();
    let pairs = client.tenant_query().expect("context present");

    assert_eq!(
        pairs,
        vec![("provider", "PROV".to_string()), ("dbname", "DB1".to_string())]
    );
}

#[test]
fn api_request_tests_doc_list_includes_status_only_when_set() {
    let client = signed_in_client();
    let mut query = DocListQuery {
        search: "PO-1".to_string(),
        from_date: "2026-01-01".to_string(),
        to_date: "2026-01-31".to_string(),
        ..DocListQuery::default()
    };

    let without_status = client.doc_list_pairs(&query).expect("pairs build");
    assert!(without_status.iter().all(|(key, _)| *key != "status"));

    query.status = Some(2);
    let request = client
        .build_request(
            Method::GET,
            "getReceiveDocList",
            &client.doc_list_pairs(&query).expect("pairs build"),
        )
        .expect("request builds");
    let params = query_of(&request);
    assert_eq!(params["status"], "2");
    assert_eq!(params["page"], "1");
    assert_eq!(params["size"], "20");
    assert_eq!(params["fromdate"], "2026-01-01");
    assert_eq!(params["provider"], "PROV");
}

#[test]
fn api_request_tests_image_url_carries_tenant() {
    let client = signed_in_client();
    let url = client.image_url("ab-12").expect("url builds");

    assert_eq!(url.path(), "/receive/getDocImage/ab-12");
    assert_eq!(url.query(), Some("provider=PROV&dbname=DB1"));
}

#[tokio::test]
async fn api_request_tests_tenant_calls_require_login_context() {
    let client = client_with(Arc::new(SessionStore::in_memory()));

    assert!(matches!(
        client.send_approve("RCD1").await,
        Err(ApiError::MissingLoginContext)
    ));
    assert!(matches!(
        client.images_list("RCD1").await,
        Err(ApiError::MissingLoginContext)
    ));
    assert!(matches!(
        client.image_url("guid"),
        Err(ApiError::MissingLoginContext)
    ));
}

#[tokio::test]
async fn api_request_tests_unreachable_server_is_transport_failure() {
    let config = ApiConfig {
        request_timeout: Duration::from_secs(2),
        ..ApiConfig::new("http://127.0.0.1:9/").expect("config is valid")
    };
    let client =
        ApiClient::new(config, Arc::new(SessionStore::in_memory())).expect("client builds");
    let credentials = Credentials::new("PROV", "DB1", "U1", "secret");

    let error = client
        .authenticate(&credentials)
        .await
        .expect_err("nothing listens on the discard port");
    assert!(matches!(error, AuthError::Transport(_)));
}
