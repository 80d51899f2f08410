//! Vault HTTP session factory
//!
//! Speaks the Vault HTTP API directly with `reqwest`: login (or static token
//! lookup), logical write/read, and self revocation.

use crate::{
    config::Profile,
    error::SessionError,
    session::{Session, SessionFactory},
};
use async_trait::async_trait;
use log::{debug, warn};
use reliability_common::VAULT_RETRY_BACKOFF_MS;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Shared HTTP plumbing of the factory and its sessions
struct VaultApi {
    client: Client,
    address: String,
    max_retries: u32,
    backoff: Duration,
}

impl VaultApi {
    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a request, retrying connection errors, 5xx and 412
    ///
    /// # Returns
    ///
    /// Decoded JSON body, or `None` for an empty body
    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Option<Value>, SessionError> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = token {
                request = request.header(VAULT_TOKEN_HEADER, token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let result = request.send().await;
            let retryable = match &result {
                Err(e) => e.is_connect() || e.is_timeout(),
                Ok(response) => {
                    response.status().is_server_error()
                        || response.status() == StatusCode::PRECONDITION_FAILED
                }
            };

            if retryable && attempt < self.max_retries {
                attempt += 1;
                warn!(
                    "{} {} failed, retrying ({}/{})",
                    method, url, attempt, self.max_retries
                );
                tokio::time::sleep(self.backoff).await;
                continue;
            }

            return decode(result?).await;
        }
    }
}

async fn decode(response: reqwest::Response) -> Result<Option<Value>, SessionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SessionError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Opens Vault sessions for probe profiles
pub struct VaultSessionFactory {
    api: Arc<VaultApi>,
}

impl VaultSessionFactory {
    /// Create a factory with the default retry backoff
    ///
    /// # Arguments
    ///
    /// * `address` - Vault base URL, e.g. `https://vault:8200`
    /// * `timeout` - Per-request client timeout
    /// * `max_retries` - Extra attempts for retryable failures
    pub fn new(address: &str, timeout: Duration, max_retries: u32) -> Result<Self, SessionError> {
        Self::with_backoff(
            address,
            timeout,
            max_retries,
            Duration::from_millis(VAULT_RETRY_BACKOFF_MS),
        )
    }

    /// Create a factory with an explicit pause between retry attempts
    pub fn with_backoff(
        address: &str,
        timeout: Duration,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api: Arc::new(VaultApi {
                client,
                address: address.to_string(),
                max_retries,
                backoff,
            }),
        })
    }
}

#[async_trait]
impl SessionFactory for VaultSessionFactory {
    async fn open(&self, profile: &Profile) -> Result<Box<dyn Session>, SessionError> {
        let token = if !profile.auth_token.is_empty() {
            self.api
                .send(
                    Method::GET,
                    "auth/token/lookup-self",
                    Some(profile.auth_token.as_str()),
                    None,
                )
                .await?;
            profile.auth_token.clone()
        } else if !profile.auth_path.is_empty() {
            let body = Value::Object(profile.auth_data.clone());
            let response = self
                .api
                .send(Method::POST, &profile.auth_path, None, Some(&body))
                .await?;
            response
                .as_ref()
                .and_then(|r| r.pointer("/auth/client_token"))
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .ok_or(SessionError::MissingToken)?
                .to_string()
        } else {
            return Err(SessionError::InvalidCredentials(format!(
                "profile {} has neither auth_token nor auth_path",
                profile.name
            )));
        };

        debug!("Authenticated profile {}", profile.name);

        Ok(Box::new(VaultSession {
            api: Arc::clone(&self.api),
            token,
        }))
    }
}

struct VaultSession {
    api: Arc<VaultApi>,
    token: String,
}

#[async_trait]
impl Session for VaultSession {
    async fn write(&self, path: &str, data: &Map<String, Value>) -> Result<(), SessionError> {
        let body = Value::Object(data.clone());
        self.api
            .send(Method::POST, path, Some(self.token.as_str()), Some(&body))
            .await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Value, SessionError> {
        let secret = self
            .api
            .send(Method::GET, path, Some(self.token.as_str()), None)
            .await?;
        Ok(secret.unwrap_or(Value::Null))
    }

    async fn revoke_self(&self) -> Result<(), SessionError> {
        self.api
            .send(
                Method::POST,
                "auth/token/revoke-self",
                Some(self.token.as_str()),
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    fn factory(server: &MockServer, max_retries: u32) -> VaultSessionFactory {
        VaultSessionFactory::with_backoff(
            &server.base_url(),
            Duration::from_secs(5),
            max_retries,
            Duration::ZERO,
        )
        .unwrap()
    }

    fn login_profile() -> Profile {
        let mut auth_data = Map::new();
        auth_data.insert("password".to_string(), json!("pw"));
        Profile {
            name: "app".to_string(),
            auth_path: "auth/userpass/login/app".to_string(),
            auth_data,
            ..Profile::default()
        }
    }

    #[tokio::test]
    async fn test_login_then_write_read_revoke() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/auth/userpass/login/app")
                    .json_body(json!({"password": "pw"}));
                then.status(200)
                    .json_body(json!({"auth": {"client_token": "s.session"}}));
            })
            .await;
        let write = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/secret/probe")
                    .header("X-Vault-Token", "s.session")
                    .json_body(json!({"foo": "bar"}));
                then.status(204);
            })
            .await;
        let read = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/secret/probe")
                    .header("X-Vault-Token", "s.session");
                then.status(200).json_body(json!({"data": {"foo": "bar"}}));
            })
            .await;
        let revoke = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/auth/token/revoke-self")
                    .header("X-Vault-Token", "s.session");
                then.status(204);
            })
            .await;

        let session = factory(&server, 0).open(&login_profile()).await.unwrap();
        let mut data = Map::new();
        data.insert("foo".to_string(), json!("bar"));
        session.write("secret/probe", &data).await.unwrap();
        let secret = session.read("secret/probe").await.unwrap();
        session.revoke_self().await.unwrap();

        assert_eq!(secret["data"]["foo"], "bar");
        login.assert_async().await;
        write.assert_async().await;
        read.assert_async().await;
        revoke.assert_async().await;
    }

    #[tokio::test]
    async fn test_static_token_is_looked_up() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/auth/token/lookup-self")
                    .header("X-Vault-Token", "s.static");
                then.status(200).json_body(json!({"data": {"ttl": 60}}));
            })
            .await;

        let profile = Profile {
            name: "static".to_string(),
            auth_token: "s.static".to_string(),
            ..Profile::default()
        };
        assert!(factory(&server, 0).open(&profile).await.is_ok());
        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_without_token_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/auth/userpass/login/app");
                then.status(200).json_body(json!({"auth": null}));
            })
            .await;

        let err = factory(&server, 0).open(&login_profile()).await.err().unwrap();
        assert!(matches!(err, SessionError::MissingToken));
    }

    #[tokio::test]
    async fn test_denied_login_is_not_retried() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/auth/userpass/login/app");
                then.status(400).body("invalid username or password");
            })
            .await;

        let err = factory(&server, 2).open(&login_profile()).await.err().unwrap();
        assert!(matches!(err, SessionError::Status { status: 400, .. }));
        assert_eq!(login.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/auth/userpass/login/app");
                then.status(503);
            })
            .await;

        let err = factory(&server, 2).open(&login_profile()).await.err().unwrap();
        assert!(matches!(err, SessionError::Status { status: 503, .. }));
        assert_eq!(login.hits_async().await, 3);
    }

    #[tokio::test]
    async fn test_missing_secret_is_a_read_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/auth/token/lookup-self");
                then.status(200).json_body(json!({}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/secret/missing");
                then.status(404).json_body(json!({"errors": []}));
            })
            .await;

        let profile = Profile {
            name: "static".to_string(),
            auth_token: "s.static".to_string(),
            ..Profile::default()
        };
        let session = factory(&server, 0).open(&profile).await.unwrap();
        let err = session.read("secret/missing").await.unwrap_err();
        assert!(matches!(err, SessionError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_profile_without_credentials() {
        let server = MockServer::start_async().await;
        let profile = Profile {
            name: "empty".to_string(),
            ..Profile::default()
        };
        let err = factory(&server, 0).open(&profile).await.err().unwrap();
        assert!(matches!(err, SessionError::InvalidCredentials(_)));
    }
}
