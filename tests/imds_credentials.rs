//! Credential resolution against a mocked instance metadata service.

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sonic_bridge::core::credentials::{CredentialError, CredentialProvider};

const ROLE_DOCUMENT: &str = r#"{
    "Code": "Success",
    "LastUpdated": "2026-08-29T00:00:00Z",
    "Type": "AWS-HMAC",
    "AccessKeyId": "ASIAEXAMPLE",
    "SecretAccessKey": "wJalrXUtnFEMI",
    "Token": "IQoJb3JpZ2luX2Vj",
    "Expiration": "2026-08-29T06:00:00Z"
}"#;

async fn mount_role_endpoints(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/iam/security-credentials/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("bridge-instance-role\n"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/latest/meta-data/iam/security-credentials/bridge-instance-role",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ROLE_DOCUMENT, "application/json"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_two_step_fetch_with_imdsv2_token() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .and(header("X-aws-ec2-metadata-token-ttl-seconds", "21600"))
        .respond_with(ResponseTemplate::new(200).set_body_string("session-token-abc"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/iam/security-credentials/"))
        .and(header("X-aws-ec2-metadata-token", "session-token-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("bridge-instance-role"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/latest/meta-data/iam/security-credentials/bridge-instance-role",
        ))
        .and(header("X-aws-ec2-metadata-token", "session-token-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ROLE_DOCUMENT, "application/json"))
        .mount(&server)
        .await;

    let provider = CredentialProvider::Imds {
        base_url: server.uri(),
    };
    let creds = provider.resolve().await.unwrap();
    assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
    assert_eq!(creds.secret_access_key, "wJalrXUtnFEMI");
    assert_eq!(creds.session_token.as_deref(), Some("IQoJb3JpZ2luX2Vj"));
}

#[tokio::test]
async fn test_fetch_falls_back_to_imdsv1_when_token_refused() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    mount_role_endpoints(&server).await;

    let provider = CredentialProvider::Imds {
        base_url: server.uri(),
    };
    let creds = provider.resolve().await.unwrap();
    assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
}

#[tokio::test]
async fn test_missing_role_listing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("session-token-abc"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/iam/security-credentials/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider = CredentialProvider::Imds {
        base_url: server.uri(),
    };
    match provider.resolve().await {
        Err(CredentialError::Status(404, url)) => {
            assert!(url.ends_with("/latest/meta-data/iam/security-credentials/"));
        }
        other => panic!("expected a 404 status error, got {other:?}"),
    }
}
