//! Credential resolution for the inference stream client.
//!
//! Resolution happens exactly once at startup and the result is threaded into
//! connector construction; nothing here mutates process environment. Static
//! configuration short-circuits the metadata fetch entirely. A resolution
//! failure is logged and tolerated - the server still comes up, but every
//! session handshake will fail until the host gets credentials.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

/// Per-request timeout for the metadata service. The endpoint is link-local;
/// anything slower than this means it is not there.
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// Requested lifetime for the IMDSv2 session token.
const IMDS_TOKEN_TTL_SECONDS: &str = "21600";

/// Short-lived AWS credentials, however they were obtained.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("metadata service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata service returned HTTP {0} for {1}")]
    Status(u16, String),
}

/// Shape of the role credentials document served by the metadata service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImdsCredentialsDocument {
    access_key_id: String,
    secret_access_key: String,
    token: String,
}

/// How to obtain credentials for this process.
#[derive(Debug, Clone)]
pub enum CredentialProvider {
    /// Credentials were supplied directly through configuration.
    Static(ResolvedCredentials),
    /// Fetch temporary role credentials from the instance metadata service.
    Imds { base_url: String },
}

impl CredentialProvider {
    /// Static when the config carries both key halves, metadata fetch
    /// otherwise.
    pub fn from_config(config: &ServerConfig) -> Self {
        match (&config.aws_access_key_id, &config.aws_secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                info!("using static credentials from configuration");
                Self::Static(ResolvedCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: config.aws_session_token.clone(),
                })
            }
            _ => Self::Imds {
                base_url: config.imds_base_url.clone(),
            },
        }
    }

    pub async fn resolve(&self) -> Result<ResolvedCredentials, CredentialError> {
        match self {
            Self::Static(creds) => Ok(creds.clone()),
            Self::Imds { base_url } => fetch_from_imds(base_url).await,
        }
    }
}

/// Two-step fetch: role name from the security-credentials listing, then that
/// role's temporary credentials. The IMDSv2 session token is best-effort; on
/// hosts still serving IMDSv1 the request works without it.
async fn fetch_from_imds(base_url: &str) -> Result<ResolvedCredentials, CredentialError> {
    let client = reqwest::Client::builder().timeout(IMDS_TIMEOUT).build()?;

    let token = match client
        .put(format!("{base_url}/latest/api/token"))
        .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECONDS)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response.text().await.ok(),
        Ok(response) => {
            debug!(status = %response.status(), "IMDSv2 token request refused, continuing without token");
            None
        }
        Err(e) => {
            debug!("IMDSv2 token request failed, continuing without token: {e}");
            None
        }
    };

    let with_token = |request: reqwest::RequestBuilder| match &token {
        Some(token) => request.header("X-aws-ec2-metadata-token", token),
        None => request,
    };

    let role_url = format!("{base_url}/latest/meta-data/iam/security-credentials/");
    let role_response = with_token(client.get(&role_url)).send().await?;
    if !role_response.status().is_success() {
        return Err(CredentialError::Status(
            role_response.status().as_u16(),
            role_url,
        ));
    }
    let role_name = role_response.text().await?.trim().to_string();
    debug!(role = %role_name, "resolved instance role");

    let creds_url = format!("{base_url}/latest/meta-data/iam/security-credentials/{role_name}");
    let creds_response = with_token(client.get(&creds_url)).send().await?;
    if !creds_response.status().is_success() {
        return Err(CredentialError::Status(
            creds_response.status().as_u16(),
            creds_url,
        ));
    }
    let document: ImdsCredentialsDocument = creds_response.json().await?;

    info!(role = %role_name, "temporary credentials loaded from metadata service");
    Ok(ResolvedCredentials {
        access_key_id: document.access_key_id,
        secret_access_key: document.secret_access_key,
        session_token: Some(document.token),
    })
}

/// Startup helper: resolve once, tolerate failure.
pub async fn resolve_at_startup(config: &ServerConfig) -> Option<ResolvedCredentials> {
    match CredentialProvider::from_config(config).resolve().await {
        Ok(creds) => Some(creds),
        Err(e) => {
            warn!("credential resolution failed, sessions will not start until the host has credentials: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(key: Option<&str>, secret: Option<&str>) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.aws_access_key_id = key.map(str::to_string);
        config.aws_secret_access_key = secret.map(str::to_string);
        config
    }

    #[test]
    fn test_static_provider_when_both_keys_present() {
        let config = config_with_keys(Some("AKIA"), Some("secret"));
        let provider = CredentialProvider::from_config(&config);
        assert!(matches!(provider, CredentialProvider::Static(_)));
    }

    #[test]
    fn test_imds_provider_when_key_half_missing() {
        let config = config_with_keys(Some("AKIA"), None);
        let provider = CredentialProvider::from_config(&config);
        assert!(matches!(provider, CredentialProvider::Imds { .. }));
    }

    #[tokio::test]
    async fn test_static_resolution_is_immediate() {
        let config = config_with_keys(Some("AKIA"), Some("secret"));
        let creds = CredentialProvider::from_config(&config)
            .resolve()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.secret_access_key, "secret");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn test_credentials_document_field_names() {
        let document: ImdsCredentialsDocument = serde_json::from_str(
            r#"{"AccessKeyId":"AKIA","SecretAccessKey":"s3cr3t","Token":"tok","Expiration":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(document.access_key_id, "AKIA");
        assert_eq!(document.token, "tok");
    }
}
