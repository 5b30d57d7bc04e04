#![allow(clippy::unwrap_used)]
// Integration tests for `XmlApiClient` using wiremock.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use panwatch_api::commands::{CONFIG_VSYS_LIST, OP_SHOW_SESSION_INFO, OP_SHOW_SYSTEM_INFO};
use panwatch_api::{Error, XmlApiClient};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, XmlApiClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = XmlApiClient::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

fn xml(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(body)
}

fn key() -> SecretString {
    SecretString::from("LUFRPT1234==")
}

// ── Key exchange ────────────────────────────────────────────────────

#[tokio::test]
async fn test_keygen_success() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "keygen"))
        .and(query_param("user", "admin"))
        .and(query_param("password", "s3cret"))
        .respond_with(xml(
            r#"<response status="success"><result><key>LUFRPT1234==</key></result></response>"#,
        ))
        .mount(&server)
        .await;

    let password = SecretString::from("s3cret");
    let key = client.key_gen("admin", &password, TIMEOUT).await.unwrap();
    assert_eq!(key.expose_secret(), "LUFRPT1234==");
}

#[tokio::test]
async fn test_keygen_rejected_carries_remote_message() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "keygen"))
        .respond_with(xml(
            r#"<response status="error" code="403"><result><msg>Invalid Credential</msg></result></response>"#,
        ))
        .mount(&server)
        .await;

    let password = SecretString::from("wrong");
    let result = client.key_gen("admin", &password, TIMEOUT).await;

    match result {
        Err(Error::Remote { message }) => assert_eq!(message, "Invalid Credential"),
        other => panic!("expected Remote error, got: {other:?}"),
    }
}

// ── Operational commands ────────────────────────────────────────────

#[tokio::test]
async fn test_op_returns_result_element() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "op"))
        .and(query_param("key", "LUFRPT1234=="))
        .and(query_param("cmd", OP_SHOW_SYSTEM_INFO))
        .respond_with(xml(
            r#"<response status="success"><result><system>
                <serial>007951000123456</serial>
                <model>PA-850</model>
                <sw-version>10.1.3</sw-version>
            </system></result></response>"#,
        ))
        .mount(&server)
        .await;

    let result = client
        .op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.name(), "result");
    assert_eq!(result.find_text("serial").as_deref(), Some("007951000123456"));
    assert_eq!(result.find_text("sw-version").as_deref(), Some("10.1.3"));
}

#[tokio::test]
async fn test_op_scoped_to_vsys() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "op"))
        .and(query_param("vsys", "vsys2"))
        .respond_with(xml(
            r#"<response status="success"><result><num-active>12</num-active></result></response>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let result = client
        .op(&key(), OP_SHOW_SESSION_INFO, Some("vsys2"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(result.find_text("num-active").as_deref(), Some("12"));
}

#[tokio::test]
async fn test_config_get_sends_xpath() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "config"))
        .and(query_param("action", "get"))
        .and(query_param("xpath", CONFIG_VSYS_LIST))
        .respond_with(xml(
            r#"<response status="success"><result><vsys><entry name="vsys1"/><entry name="vsys2"/></vsys></result></response>"#,
        ))
        .mount(&server)
        .await;

    let result = client
        .config_get(&key(), CONFIG_VSYS_LIST, TIMEOUT)
        .await
        .unwrap();
    let names: Vec<_> = result
        .find_all("entry")
        .iter()
        .filter_map(|e| e.attr("name"))
        .collect();
    assert_eq!(names, vec!["vsys1", "vsys2"]);
}

// ── Failure modes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_non_xml_body_is_parse_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(xml("<response status=\"success\"><result>"))
        .mount(&server)
        .await;

    let result = client.op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT).await;
    assert!(
        matches!(result, Err(Error::Xml { .. })),
        "expected Xml error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_http_error_status_is_transport_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = client.op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT).await;
    assert!(
        matches!(result, Err(Error::Transport(_))),
        "expected Transport error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_error_status_with_envelope_keeps_remote_message() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            r#"<response status="error" code="403"><result><msg>Invalid Credential</msg></result></response>"#,
        ))
        .mount(&server)
        .await;

    let err = client
        .op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.remote_message(), Some("Invalid Credential"));
    assert_eq!(err.to_string(), "Request failed (Invalid Credential)");
}

#[tokio::test]
async fn test_error_status_does_not_leak_api_key() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = client
        .op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT)
        .await
        .unwrap_err();
    let shown = format!("{err} {err:?}");
    assert!(matches!(err, Error::Transport(_)));
    assert!(!shown.contains(key().expose_secret()), "key leaked: {shown}");
    assert!(!shown.contains("key="), "query leaked: {shown}");
}

#[tokio::test]
async fn test_keygen_failure_does_not_leak_password() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let password = SecretString::from("hunter2-secret");
    let err = client
        .key_gen("admin", &password, TIMEOUT)
        .await
        .unwrap_err();
    let shown = format!("{err} {err:?}");
    assert!(!shown.contains("hunter2-secret"), "password leaked: {shown}");
}

#[tokio::test]
async fn test_connection_failure_does_not_leak_api_key() {
    // Nothing listens on port 1.
    let client = XmlApiClient::with_client(
        reqwest::Client::new(),
        Url::parse("http://127.0.0.1:1").unwrap(),
    );

    let err = client
        .op(&key(), OP_SHOW_SYSTEM_INFO, None, TIMEOUT)
        .await
        .unwrap_err();
    let shown = format!("{err} {err:?}");
    assert!(matches!(err, Error::Transport(_)));
    assert!(!shown.contains(key().expose_secret()), "key leaked: {shown}");
}

#[tokio::test]
async fn test_no_timeout_waits_for_slow_response() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(
            xml(r#"<response status="success"><result/></response>"#)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let result = client.op(&key(), OP_SHOW_SYSTEM_INFO, None, None).await;
    assert!(result.is_ok(), "expected success, got: {result:?}");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(
            xml(r#"<response status="success"><result/></response>"#)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client
        .op(&key(), OP_SHOW_SYSTEM_INFO, None, Some(Duration::from_millis(100)))
        .await;
    let err = result.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got: {err:?}");
    assert!(err.is_transient());
}
