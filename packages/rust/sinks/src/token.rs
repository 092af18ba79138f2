//! Bearer token providers for push targets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use awardsync_shared::{AwardSyncError, PushConfig, PushCredentials, Result};

/// Source of a bearer token. Failures surface as `AwardSyncError::Auth`.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A token supplied up front (tests, or a token minted elsewhere).
#[derive(Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(AwardSyncError::auth("static token is empty"));
        }
        Ok(self.0.clone())
    }
}

/// OAuth2 client-credentials grant against a tenant token endpoint.
pub struct ClientCredentialsProvider {
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
    client: Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ClientCredentialsProvider {
    /// Build from the `[push]` section and the env-sourced credentials.
    pub fn from_config(push: &PushConfig, creds: &PushCredentials) -> Result<Self> {
        let raw = push.token_url_template.replace("{tenant}", &creds.tenant_id);
        let token_url = Url::parse(&raw)
            .map_err(|e| AwardSyncError::config(format!("invalid token URL '{raw}': {e}")))?;
        Self::new(
            token_url,
            &creds.client_id,
            &creds.client_secret,
            &push.scope,
        )
    }

    pub fn new(token_url: Url, client_id: &str, client_secret: &str, scope: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AwardSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            token_url,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    #[instrument(skip_all, fields(token_url = %self.token_url))]
    async fn token(&self) -> Result<String> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(self.token_url.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| AwardSyncError::auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AwardSyncError::auth(format!(
                "token endpoint returned HTTP {status}: {body}"
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AwardSyncError::auth(format!("unreadable token response: {e}")))?;

        debug!("bearer token acquired");
        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> ClientCredentialsProvider {
        let push = PushConfig {
            token_url_template: format!("{}/{{tenant}}/oauth2/v2.0/token", server.uri()),
            ..PushConfig::default()
        };
        let creds = PushCredentials {
            dataset_id: "ds".into(),
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
        };
        ClientCredentialsProvider::from_config(&push, &creds).unwrap()
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "tok-abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = provider_for(&server).token().await.unwrap();
        assert_eq!(token, "tok-abc");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = provider_for(&server).token().await.unwrap_err();
        assert!(matches!(err, AwardSyncError::Auth(_)));
        assert!(err.to_string().contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken("t".into()).token().await.unwrap(), "t");
        assert!(StaticToken(String::new()).token().await.is_err());
    }
}
