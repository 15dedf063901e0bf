//! End-to-end calls through `ApiClient` against a mockito server.

mod common;

use api_throttle::{Backoff, Error, Response};
use common::{Api, Env, MockServerFixture};
use mockito::Matcher;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq)]
struct FooModel {
    foo: i32,
}

#[derive(Debug, Serialize)]
struct LoginForm<'a> {
    user: &'a str,
    password: &'a str,
}

#[tokio::test]
async fn test_get_decodes_envelope_and_sends_headers() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/foomodel")
        .match_header("authorization", "Bearer abc")
        .match_header("accept", "application/json")
        .match_header(
            "x-request-id",
            Matcher::Regex("^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$".into()),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"message":"ok","data":{"foo":42}}"#)
        .create_async()
        .await;

    let client = fixture.client_builder().build().unwrap();
    client.set_auth_token(Some("abc".to_string()));
    client.add_header(Api::FooModel, "Accept", "application/json");

    let resp: Response<FooModel> = client.get(Api::FooModel).await.unwrap();
    assert!(resp.is_success());
    assert_eq!(resp.message.as_deref(), Some("ok"));
    assert_eq!(resp.data, Some(FooModel { foo: 42 }));
    mock.assert_async().await;

    let snap = client.signals();
    assert_eq!(snap.global_active, 0);
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/login")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("user".into(), "ada".into()),
            Matcher::UrlEncoded("password".into(), "s3cret".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"Success":true,"Data":"token-1"}"#)
        .create_async()
        .await;

    let client = fixture.client_builder().build().unwrap();
    let resp: Response<String> = client
        .post(
            Api::Login,
            &LoginForm {
                user: "ada",
                password: "s3cret",
            },
        )
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.into_data().as_deref(), Some("token-1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_json_sends_json_body() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/barmodel")
        .match_body(Matcher::Json(serde_json::json!({"bar": 7})))
        .with_status(200)
        .with_body(r#"{"success":true}"#)
        .create_async()
        .await;

    let client = fixture.client_builder().build().unwrap();
    let resp: Response<serde_json::Value> = client
        .post_json(Api::BarModel, &serde_json::json!({"bar": 7}))
        .await
        .unwrap();
    assert!(resp.success);
    assert!(resp.data.is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upload_sends_fields_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cat.png");
    std::fs::write(&file, b"not really a png").unwrap();

    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/upload")
        .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="title"\r\n\r\ncat"#.into()),
            Matcher::Regex(r#"name="photo"; filename="cat.png""#.into()),
            Matcher::Regex("not really a png".into()),
        ]))
        .with_status(201)
        .create_async()
        .await;

    let client = fixture.client_builder().build().unwrap();
    let resp = client
        .upload(Api::Upload, &serde_json::json!({"title": "cat"}), &file)
        .await
        .unwrap();
    assert!(resp.is_success());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upload_of_missing_file_is_not_retried() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/upload")
        .expect(0)
        .create_async()
        .await;

    let client = fixture.client_builder().max_attempts(3).build().unwrap();
    let err = client
        .try_upload(Api::Upload, &(), "/definitely/not/here.png")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_writes_sanitised_file_and_skips_existing() {
    let root = tempfile::tempdir().unwrap();
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/download")
        .with_status(200)
        .with_body("quarterly numbers")
        .expect(1)
        .create_async()
        .await;

    let client = fixture
        .client_builder()
        .download_root(root.path())
        .build()
        .unwrap();

    let resp = client
        .download(Api::Download, "files/report:2024.txt", "reports", true)
        .await
        .unwrap();
    let path = resp.into_data().unwrap();
    assert_eq!(path, root.path().join("reports").join("report_2024.txt"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "quarterly numbers");

    // second call finds the file and makes no request
    let again = client
        .download(Api::Download, "files/report:2024.txt", "reports", true)
        .await
        .unwrap();
    assert_eq!(again.data, Some(path));
    mock.assert_async().await;
}

fn short_timeout_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

/// Sends the first bytes, then stalls well past the client timeout.
fn stalled_body(w: &mut dyn Write) -> std::io::Result<()> {
    w.write_all(b"{\"success\":")?;
    w.flush()?;
    std::thread::sleep(Duration::from_secs(2));
    w.write_all(b"true}")
}

#[tokio::test]
async fn test_reqwest_timeout_maps_to_timeout_and_is_not_retried() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/foomodel")
        .with_status(200)
        .with_chunked_body(stalled_body)
        .expect(1)
        .create_async()
        .await;

    let client = fixture
        .client_builder()
        .max_attempts(3)
        .backoff(Backoff::Fixed { delay_ms: 5 })
        .http_client(short_timeout_client())
        .build()
        .unwrap();

    let err = client.get::<FooModel>(Api::FooModel).await.unwrap_err();
    match &err {
        Error::Timeout {
            endpoint,
            cancelled,
        } => {
            assert_eq!(endpoint, "FooModel");
            assert!(!cancelled);
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
    assert_eq!(client.signals().global_active, 0);
}

#[tokio::test]
async fn test_interrupted_download_leaves_no_partial_file() {
    let root = tempfile::tempdir().unwrap();
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/download")
        .with_status(200)
        .with_chunked_body(stalled_body)
        .expect(1)
        .create_async()
        .await;

    let client = fixture
        .client_builder()
        .download_root(root.path())
        .http_client(short_timeout_client())
        .build()
        .unwrap();

    let resp = client
        .try_download(Api::Download, "files/a.txt", "d", false)
        .await
        .unwrap();
    assert!(!resp.success);
    assert!(matches!(resp.error, Some(Error::Timeout { .. })));
    mock.assert_async().await;

    let dir = root.path().join("d");
    assert!(!dir.join("a.txt").exists());
    assert!(!dir.join("a.txt.part").exists());
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/foomodel")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = fixture
        .client_builder()
        .max_attempts(3)
        .backoff(Backoff::Fixed { delay_ms: 5 })
        .build()
        .unwrap();

    let err = client.get::<FooModel>(Api::FooModel).await.unwrap_err();
    match &err {
        Error::RetriesExhausted {
            endpoint, attempts, ..
        } => {
            assert_eq!(endpoint, "FooModel");
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;

    // the non-raising form folds the same outcome into the envelope
    let resp = client.try_get::<FooModel>(Api::FooModel).await.unwrap();
    assert!(!resp.success);
    assert!(matches!(resp.error, Some(Error::RetriesExhausted { .. })));
}

#[tokio::test]
async fn test_refused_call_never_reaches_server() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("GET", "/barmodel")
        .expect(0)
        .create_async()
        .await;

    let client = fixture.client_builder().build().unwrap();
    client.set_max_concurrent(Api::BarModel, 0);

    let err = client.get::<serde_json::Value>(Api::BarModel).await.unwrap_err();
    assert!(err.is_too_many_requests());

    let resp = client.try_get::<serde_json::Value>(Api::BarModel).await.unwrap();
    assert!(!resp.is_success());
    assert!(resp.error.as_ref().is_some_and(Error::is_too_many_requests));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_environment_is_raised_before_dispatch() {
    let client = api_throttle::ApiClient::<Env, Api>::builder().build().unwrap();

    let err = client.get::<serde_json::Value>(Api::Login).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    // not folded into the envelope either
    assert!(client
        .try_get::<serde_json::Value>(Api::Login)
        .await
        .is_err());
    assert_eq!(client.signals().global_active, 0);
}

#[tokio::test]
async fn test_switching_environment_changes_target() {
    let mut dev = MockServerFixture::new().await;
    let mut prod = MockServerFixture::new().await;
    let dev_mock = dev
        .server
        .mock("GET", "/login")
        .with_body(r#"{"success":true,"data":"dev"}"#)
        .create_async()
        .await;
    let prod_mock = prod
        .server
        .mock("GET", "/login")
        .with_body(r#"{"success":true,"data":"prod"}"#)
        .create_async()
        .await;

    let client = dev
        .client_builder()
        .environment(Env::Production, prod.base_url.clone())
        .build()
        .unwrap();

    let first: Response<String> = client.get(Api::Login).await.unwrap();
    client.set_current_environment(Env::Production);
    let second: Response<String> = client.get(Api::Login).await.unwrap();

    assert_eq!(first.data.as_deref(), Some("dev"));
    assert_eq!(second.data.as_deref(), Some("prod"));
    dev_mock.assert_async().await;
    prod_mock.assert_async().await;
}
