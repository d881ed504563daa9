//! Subdomain accounts on the auth relayer.
//!
//! Subdomain identities do not hold their own top-level name; they log in
//! and sign up through an auth relayer that speaks for the parent tld.

use crate::error::{NomadError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument};

/// Body of `POST /login`.
#[derive(Debug, Clone, Serialize)]
struct LoginRequest<'a> {
    tld: &'a str,
    username: &'a str,
    password: &'a str,
}

/// Body of `POST /users`.
#[derive(Debug, Clone, Serialize)]
struct SignupRequest<'a> {
    tld: &'a str,
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Error body returned by the auth relayer.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Client for the subdomain auth relayer.
#[derive(Debug, Clone)]
pub struct AuthRelayerClient {
    client: Client,
    base_url: String,
}

impl AuthRelayerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NomadError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Logs a subdomain in. Any status other than 200 is a rejection.
    #[instrument(skip(self, password))]
    pub async fn login(&self, tld: &str, subdomain: &str, password: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&LoginRequest {
                tld,
                username: subdomain,
                password,
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(rejection(status, &text));
        }
        info!("subdomain login accepted");
        serde_json::from_str(&text)
            .map_err(|e| NomadError::transport(format!("Unreadable login response: {}", e)))
    }

    /// Registers a subdomain. Anything but 204 is a rejection.
    #[instrument(skip(self, email, password))]
    pub async fn signup(
        &self,
        tld: &str,
        subdomain: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/users", self.base_url))
            .json(&SignupRequest {
                tld,
                username: subdomain,
                email,
                password,
            })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }
        info!("subdomain signup accepted");
        Ok(())
    }
}

/// Maps an unexpected status to `RemoteRejected`, preferring the body's message.
fn rejection(status: StatusCode, body: &str) -> NomadError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("HTTP {}", status));
    NomadError::rejected(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_prefers_message() {
        match rejection(StatusCode::UNAUTHORIZED, r#"{"message":"bad password"}"#) {
            NomadError::RemoteRejected(msg) => assert_eq!(msg, "bad password"),
            other => panic!("unexpected {:?}", other),
        }
        match rejection(StatusCode::BAD_GATEWAY, "<html>") {
            NomadError::RemoteRejected(msg) => assert!(msg.contains("502")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_request_shape_uses_username_field() {
        let body = serde_json::to_value(LoginRequest {
            tld: "alice.",
            username: "bob",
            password: "pw",
        })
        .unwrap();
        assert_eq!(body["username"], "bob");
        assert!(body.get("subdomain").is_none());
    }
}
