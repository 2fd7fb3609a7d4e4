//! Integration tests for the login handshake against a mock identity provider.
//!
//! The mock server plays both the platform login page and the identity
//! provider. The final redirect points at the real application host, which
//! the authenticator must recognize without fetching.

use std::net::TcpListener;

use earth2_core::auth::{AuthEndpoints, AuthError, Authenticator, LoginStage, TransportTimeouts};
use earth2_core::{ApiClient, ApiEndpoints, ClientOptions, SessionCredential};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

const APP_HOST: &str = "app.earth2.io";
const EMAIL_FORM: &str = r#"<html><body>
<form method="post" action="/u/email/submit">
  <input type="hidden" name="state" value="st-email">
  <input type="email" name="email">
</form></body></html>"#;
const PASSWORD_FORM: &str = r#"<html><body>
<form method="post" action="/u/password/submit?psid:7">
  <input type="hidden" name="state" value="st-password">
  <input type="password" name="password">
</form></body></html>"#;

fn endpoints(server: &MockServer) -> AuthEndpoints {
    let uri = server.uri();
    AuthEndpoints {
        login_url: format!("{uri}/login"),
        identity_origin: uri.clone(),
        app_host: APP_HOST.to_string(),
        session_check_url: format!("{uri}/api/v2/my/favorites"),
    }
}

fn authenticator(server: &MockServer) -> Authenticator {
    Authenticator::new(endpoints(server), TransportTimeouts::default()).unwrap()
}

fn redirect_to(location: &str, cookie: &str) -> ResponseTemplate {
    ResponseTemplate::new(302)
        .insert_header("location", location)
        .insert_header("set-cookie", format!("{cookie}; Path=/; HttpOnly").as_str())
}

fn html(body: &str, cookie: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .insert_header("set-cookie", format!("{cookie}; Path=/").as_str())
        .set_body_string(body)
}

async fn mount_email_leg(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(redirect_to("/oauth/authorize?client_id=e2", "a=1"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth/authorize"))
        .respond_with(redirect_to(&format!("{}/u/email", server.uri()), "b=2"))
        .mount(server)
        .await;
}

async fn mount_happy_flow(server: &MockServer) {
    mount_email_leg(server).await;
    Mock::given(method("GET"))
        .and(path("/u/email"))
        .respond_with(html(EMAIL_FORM, "c=3"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/email/submit"))
        .respond_with(redirect_to("/u/password", "d=4"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/password"))
        .respond_with(html(PASSWORD_FORM, "e=5"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/password/submit"))
        .and(query_param("psid", "7"))
        .respond_with(redirect_to(
            &format!("https://{APP_HOST}/auth/callback?code=ok"),
            "XSRF-TOKEN=t%3D1",
        ))
        .expect(1)
        .mount(server)
        .await;
}

fn closed_port_url(path: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}{path}")
}

#[tokio::test]
async fn test_full_login_collects_cookies_in_arrival_order() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_happy_flow(&server).await;

    let credential = authenticator(&server)
        .authenticate("me@example.com", "hunter2")
        .await
        .unwrap();

    assert_eq!(
        credential.cookie(),
        "a=1; b=2; c=3; d=4; e=5; XSRF-TOKEN=t%3D1"
    );
    assert_eq!(credential.csrf_token(), Some("t=1"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6, "the application callback is never fetched");

    let email_post = &requests[3];
    let body = String::from_utf8(email_post.body.clone()).unwrap();
    assert!(body.contains("state=st-email"), "body: {body}");
    assert!(body.contains("email=me%40example.com"), "body: {body}");
    assert_eq!(
        email_post
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/x-www-form-urlencoded")
    );

    let password_post = &requests[5];
    let body = String::from_utf8(password_post.body.clone()).unwrap();
    assert!(body.contains("state=st-password"));
    assert!(body.contains("password=hunter2"));
    assert_eq!(
        password_post
            .headers
            .get("cookie")
            .and_then(|v| v.to_str().ok()),
        Some("a=1; b=2; c=3; d=4; e=5")
    );
    assert!(
        password_post
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| ua.contains("Mozilla/5.0")),
        "login traffic presents a browser user agent"
    );
}

#[tokio::test]
async fn test_email_page_without_form_reports_no_login_form() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_email_leg(&server).await;
    Mock::given(method("GET"))
        .and(path("/u/email"))
        .respond_with(html("<p>Down for maintenance</p>", "c=3"))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .authenticate("me@example.com", "pw")
        .await
        .unwrap_err();
    assert!(
        matches!(&err, AuthError::NoLoginForm { url } if url.ends_with("/u/email")),
        "got {err:?}"
    );
    assert_eq!(err.stage(), Some(LoginStage::EmailRedirects));
}

#[tokio::test]
async fn test_unknown_account_reports_no_password_form() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_email_leg(&server).await;
    Mock::given(method("GET"))
        .and(path("/u/email"))
        .respond_with(html(EMAIL_FORM, "c=3"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/email/submit"))
        .respond_with(redirect_to("/u/password", "d=4"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/password"))
        .respond_with(html("<p>No account with that email</p>", "e=5"))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .authenticate("nobody@example.com", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NoPasswordForm { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_endless_redirects_are_bounded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(redirect_to("/loop", "a=1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(redirect_to("/loop", "b=2"))
        .expect(10)
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .authenticate("me@example.com", "pw")
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            AuthError::RedirectLoopExceeded {
                stage: LoginStage::EmailRedirects,
                hops: 10
            }
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_wrong_password_page_is_not_a_redirect() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_email_leg(&server).await;
    Mock::given(method("GET"))
        .and(path("/u/email"))
        .respond_with(html(EMAIL_FORM, "c=3"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/email/submit"))
        .respond_with(redirect_to("/u/password", "d=4"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/password"))
        .respond_with(html(PASSWORD_FORM, "e=5"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/password/submit"))
        .respond_with(html("<p>Wrong email or password</p>", "f=6"))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .authenticate("me@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            AuthError::NoRedirect {
                stage: LoginStage::PasswordSubmit,
                status: 200
            }
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_server_error_on_login_page_names_the_stage() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .authenticate("me@example.com", "pw")
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(LoginStage::LoginPage));
    assert!(matches!(err, AuthError::UnexpectedStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_session_validity_statuses() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/v2/my/favorites"))
        .and(header("cookie", "sid=good"))
        .and(header("x-csrf-token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/my/favorites"))
        .and(header("cookie", "sid=stale"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let auth = authenticator(&server);

    let valid = auth
        .check_session_validity(&SessionCredential::new("sid=good", Some("tok".to_string())))
        .await;
    assert!(valid.valid);
    assert!(!valid.needs_reauth);
    assert_eq!(valid.status_code, Some(200));

    let stale = auth
        .check_session_validity(&SessionCredential::new("sid=stale", None))
        .await;
    assert!(!stale.valid);
    assert!(stale.needs_reauth);
    assert_eq!(stale.status_code, Some(403));
}

#[tokio::test]
async fn test_session_validity_unreachable_host() {
    let endpoints = AuthEndpoints {
        session_check_url: closed_port_url("/api/v2/my/favorites"),
        ..AuthEndpoints::default()
    };
    let auth = Authenticator::new(endpoints, TransportTimeouts::default()).unwrap();
    let validity = auth
        .check_session_validity(&SessionCredential::new("sid=1", None))
        .await;
    assert!(!validity.valid);
    assert!(validity.needs_reauth);
    assert_eq!(validity.status_code, None);
}

#[tokio::test]
async fn test_client_login_replaces_session_used_by_queries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_happy_flow(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/my/favorites"))
        .and(header("x-xsrf-token", "t=1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(ClientOptions {
        endpoints: ApiEndpoints::single_host(&server.uri()),
        auth: endpoints(&server),
        session: Some(SessionCredential::new("old=1", None)),
        ..ClientOptions::default()
    })
    .unwrap();

    let credential = client.login("me@example.com", "hunter2").await.unwrap();
    assert_eq!(client.session().current().unwrap().cookie(), credential.cookie());

    let favorites = client.my_favorites().await.unwrap();
    assert_eq!(favorites, serde_json::json!({"data": []}));
}

#[tokio::test]
async fn test_client_login_failure_keeps_previous_session() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ApiClient::new(ClientOptions {
        endpoints: ApiEndpoints::single_host(&server.uri()),
        auth: endpoints(&server),
        session: Some(SessionCredential::new("old=1", None)),
        ..ClientOptions::default()
    })
    .unwrap();

    let err = client.login("me@example.com", "pw").await.unwrap_err();
    assert!(matches!(err, earth2_core::ApiError::Auth(_)), "got {err:?}");
    assert_eq!(client.session().current().unwrap().cookie(), "old=1");
}
