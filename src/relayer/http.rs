//! HTTP client for a remote relayer.

use super::{IdentityRegistration, RecordLookup, Relayer, RelayerResponse};
use crate::crypto::IdentityPublicKey;
use crate::error::{NomadError, Result};
use crate::identity::{undot_name, Identity};
use crate::log::{BlobInfo, CommitRequest, CommitResult, PrecommitRequest, PrecommitResult, RefHash};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Relayer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRelayer {
    client: Client,
    base_url: String,
}

impl HttpRelayer {
    /// Creates a client for the relayer at `base_url`.
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

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Name used in blob URLs.
    fn blob_name(identity: &Identity) -> String {
        undot_name(&identity.username()).to_string()
    }

    /// Registers a public key with a development relayer.
    #[instrument(skip(self, public_key), fields(identity = %identity))]
    pub async fn register_identity(
        &self,
        identity: &Identity,
        public_key: &IdentityPublicKey,
    ) -> Result<()> {
        let body = IdentityRegistration {
            tld: identity.tld.clone(),
            subdomain: identity.subdomain.clone(),
            public_key: public_key.to_hex(),
        };
        let response: RelayerResponse = self
            .client
            .post(self.url("/relayer/identities"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        response.into_result().map(|_| ())
    }
}

/// True when the request provably never reached the relayer.
fn never_sent(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_builder()
}

#[async_trait]
impl Relayer for HttpRelayer {
    #[instrument(skip(self), fields(identity = %identity))]
    async fn blob_offset(&self, identity: &Identity) -> Result<u64> {
        let url = self.url(&format!("/blob/{}/info", Self::blob_name(identity)));
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body: RelayerResponse = response.json().await.map_err(|e| {
            NomadError::transport(format!("Unreadable blob info (HTTP {}): {}", status, e))
        })?;
        let info: BlobInfo = body.into_typed_result()?;
        debug!(offset = info.offset, "fetched blob offset");
        Ok(info.offset)
    }

    #[instrument(skip(self, request), fields(tld = %request.tld, offset = request.offset))]
    async fn precommit(&self, request: &PrecommitRequest) -> Result<PrecommitResult> {
        let response = self
            .client
            .post(self.url("/relayer/precommit"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: Option<RelayerResponse> = serde_json::from_str(&text).ok();

        match body {
            Some(body) if status == StatusCode::OK => body.into_typed_result(),
            Some(body) if body.error => Err(NomadError::rejected(body.reason())),
            _ if status == StatusCode::OK => Err(NomadError::transport(
                "Relayer returned an unreadable precommit response",
            )),
            _ if status.is_client_error() => {
                Err(NomadError::rejected(format!("HTTP {}: {}", status, text)))
            }
            _ => Err(NomadError::transport(format!("HTTP {}: {}", status, text))),
        }
    }

    #[instrument(skip(self, request), fields(tld = %request.tld, offset = request.offset))]
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult> {
        let unknown = || NomadError::CommitOutcomeUnknown {
            refhash: request.refhash.to_string(),
            offset: request.offset,
        };

        let response = match self
            .client
            .post(self.url("/relayer/commit"))
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if never_sent(&e) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "commit response lost");
                return Err(unknown());
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "commit response body lost");
                return Err(unknown());
            }
        };

        match serde_json::from_str::<RelayerResponse>(&text) {
            Ok(body) => body.into_typed_result(),
            Err(e) => {
                warn!(%status, error = %e, "unreadable commit response");
                Err(unknown())
            }
        }
    }

    #[instrument(skip(self), fields(identity = %identity, refhash = %refhash))]
    async fn has_record(&self, identity: &Identity, refhash: &RefHash) -> Result<bool> {
        let url = self.url(&format!("/relayer/records/{}", refhash));
        let response = self
            .client
            .get(url)
            .query(&[
                ("tld", identity.tld.as_str()),
                ("subdomain", identity.subdomain.as_str()),
            ])
            .send()
            .await?;
        let body: RelayerResponse = response.json().await?;
        let lookup: RecordLookup = body.into_typed_result()?;
        Ok(lookup.exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let relayer = HttpRelayer::new("http://127.0.0.1:8888/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(relayer.base_url(), "http://127.0.0.1:8888");
        assert_eq!(
            relayer.url("/relayer/commit"),
            "http://127.0.0.1:8888/relayer/commit"
        );
    }

    #[test]
    fn test_blob_name() {
        let sub = Identity::with_subdomain("alice", "bob").unwrap();
        assert_eq!(HttpRelayer::blob_name(&sub), "bob.alice");
        assert_eq!(HttpRelayer::blob_name(&Identity::new("alice").unwrap()), "alice");
    }

    #[tokio::test]
    async fn test_unreachable_relayer_is_a_transport_error() {
        let relayer =
            HttpRelayer::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let alice = Identity::new("alice").unwrap();
        assert!(matches!(
            relayer.blob_offset(&alice).await,
            Err(NomadError::Transport(_))
        ));
    }
}
