//! Relayer endpoints the append protocol talks to.
//!
//! The relayer is the remote authority for an identity's log: it reports the
//! current offset, seals records at precommit, and accepts signed commits.
//! Every JSON response is wrapped as `{ "error": bool, "payload": ... }`.
//!
//! ## Implementations
//!
//! - [`HttpRelayer`]: reqwest client for a remote relayer
//! - [`MemoryRelayer`]: in-process relayer used by tests and the dev server

pub mod http;
pub mod memory;

pub use http::HttpRelayer;
pub use memory::MemoryRelayer;

use crate::error::{NomadError, Result};
use crate::identity::Identity;
use crate::log::{CommitRequest, CommitResult, PrecommitRequest, PrecommitResult, RefHash};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Remote side of the append protocol.
#[async_trait]
pub trait Relayer: Send + Sync {
    /// Current tip of the identity's log.
    async fn blob_offset(&self, identity: &Identity) -> Result<u64>;

    /// Asks the relayer to seal a record at `request.offset`.
    async fn precommit(&self, request: &PrecommitRequest) -> Result<PrecommitResult>;

    /// Sends the signed record.
    ///
    /// Implementations return `CommitOutcomeUnknown` when the request may have
    /// reached the relayer but no usable answer came back.
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult>;

    /// Whether the identity's log holds a record with `refhash`.
    async fn has_record(&self, identity: &Identity, refhash: &RefHash) -> Result<bool>;
}

#[async_trait]
impl<R: Relayer + ?Sized> Relayer for std::sync::Arc<R> {
    async fn blob_offset(&self, identity: &Identity) -> Result<u64> {
        (**self).blob_offset(identity).await
    }

    async fn precommit(&self, request: &PrecommitRequest) -> Result<PrecommitResult> {
        (**self).precommit(request).await
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult> {
        (**self).commit(request).await
    }

    async fn has_record(&self, identity: &Identity, refhash: &RefHash) -> Result<bool> {
        (**self).has_record(identity, refhash).await
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Relayer response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerResponse {
    /// True when the relayer refused the request.
    pub error: bool,
    /// Result on success, reason on failure.
    #[serde(default)]
    pub payload: Value,
}

impl RelayerResponse {
    /// Creates a success response.
    pub fn success(payload: impl Serialize) -> Self {
        Self {
            error: false,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Creates an error response.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            error: true,
            payload: Value::String(reason.into()),
        }
    }

    /// Human-readable reason carried by an error payload.
    pub fn reason(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Null => "unspecified error".to_string(),
            other => other.to_string(),
        }
    }

    /// Extracts the payload, mapping an error flag to `RemoteRejected`.
    pub fn into_result(self) -> Result<Value> {
        if self.error {
            return Err(NomadError::rejected(self.reason()));
        }
        Ok(self.payload)
    }

    /// Extracts and deserializes the payload as a specific type.
    pub fn into_typed_result<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.into_result()?;
        serde_json::from_value(value).map_err(|e| {
            NomadError::serialization(format!("Failed to parse relayer payload: {}", e))
        })
    }
}

/// Payload of `GET /relayer/records/:refhash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLookup {
    pub exists: bool,
}

/// Body of `POST /relayer/identities`, used by development relayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRegistration {
    pub tld: String,
    #[serde(default)]
    pub subdomain: String,
    pub public_key: String,
}

impl From<NomadError> for RelayerResponse {
    fn from(err: NomadError) -> Self {
        let reason = match err {
            NomadError::RemoteRejected(reason) => reason,
            other => other.to_string(),
        };
        Self::failure(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_flag_maps_to_rejection() {
        let resp: RelayerResponse =
            serde_json::from_value(json!({"error": true, "payload": "stale offset"})).unwrap();
        match resp.into_result() {
            Err(NomadError::RemoteRejected(reason)) => assert_eq!(reason, "stale offset"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_typed_payload() {
        let resp = RelayerResponse::success(RecordLookup { exists: true });
        let lookup: RecordLookup = resp.into_typed_result().unwrap();
        assert!(lookup.exists);
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let resp: RelayerResponse = serde_json::from_value(json!({"error": true})).unwrap();
        assert_eq!(resp.reason(), "unspecified error");
    }

    #[test]
    fn test_rejection_reason_is_unwrapped() {
        let resp = RelayerResponse::from(NomadError::rejected("bad signature"));
        assert!(resp.error);
        assert_eq!(resp.payload, json!("bad signature"));
    }
}
