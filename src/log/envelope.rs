//! Wire bodies of the two-phase append protocol.
//!
//! Precommit asks the relayer to seal a record at an offset; commit sends the
//! same record back together with the signature over the sealed hash.

use super::record::AppendRecord;
use crate::crypto::{bytes_equal, hash_parts, IdentitySignature};
use crate::error::{NomadError, Result};
use crate::identity::Identity;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Domain tag for content addressing of records.
const REFHASH_DOMAIN: &[u8] = b"nomad-refhash-v1";

/// Domain tag for sealing a record at a log position.
const SEALED_HASH_DOMAIN: &[u8] = b"nomad-sealed-v1";

// =============================================================================
// Hashes
// =============================================================================

/// Content-addressed identifier of a record, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefHash(String);

impl RefHash {
    /// Wraps a hex refhash, normalizing to lowercase.
    pub fn new(hex_hash: impl AsRef<str>) -> Result<Self> {
        let hash = hex_hash.as_ref().trim().to_ascii_lowercase();
        if hash.is_empty() || hex::decode(&hash).is_err() {
            return Err(NomadError::invalid_input(format!(
                "Invalid refhash '{}'",
                hex_hash.as_ref()
            )));
        }
        Ok(Self(hash))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bytes the relayer asks the author to sign.
///
/// The client never interprets or re-hashes these bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedHash(Vec<u8>);

impl SealedHash {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_hash: &str) -> Result<Self> {
        hex::decode(hex_hash.trim())
            .map(Self)
            .map_err(|e| NomadError::serialization(format!("Sealed hash is not hex: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Constant-time equality.
    pub fn matches(&self, other: &SealedHash) -> bool {
        bytes_equal(&self.0, &other.0)
    }
}

impl fmt::Debug for SealedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedHash({})", self.to_hex())
    }
}

impl Serialize for SealedHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SealedHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Precommit
// =============================================================================

fn is_false(b: &bool) -> bool {
    !*b
}

/// Body of `POST /relayer/precommit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecommitRequest {
    pub tld: String,
    #[serde(default)]
    pub subdomain: String,
    #[serde(flatten)]
    pub record: AppendRecord,
    /// Position the record should occupy.
    pub offset: u64,
    /// Lets the relayer drop records at or after `offset` first.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncate: bool,
}

impl PrecommitRequest {
    pub fn new(identity: &Identity, record: AppendRecord, offset: u64, truncate: bool) -> Self {
        Self {
            tld: identity.tld.clone(),
            subdomain: identity.subdomain.clone(),
            record,
            offset,
            truncate,
        }
    }

    /// The identity whose log is being written.
    pub fn identity(&self) -> Result<Identity> {
        Identity::with_subdomain(&self.tld, &self.subdomain)
    }
}

/// Envelope metadata assigned by the relayer during precommit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Payload of a successful precommit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecommitResult {
    pub refhash: RefHash,
    pub sealed_hash: SealedHash,
    pub envelope: Envelope,
}

// =============================================================================
// Commit
// =============================================================================

/// Body of `POST /relayer/commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub tld: String,
    #[serde(default)]
    pub subdomain: String,
    #[serde(flatten)]
    pub record: AppendRecord,
    pub offset: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncate: bool,
    /// Envelope timestamp echoed from precommit.
    pub date: u64,
    pub sealed_hash: SealedHash,
    pub refhash: RefHash,
    #[serde(rename = "sig")]
    pub signature: IdentitySignature,
}

impl CommitRequest {
    /// Builds the commit for a precommitted record.
    pub fn new(
        precommit: &PrecommitRequest,
        sealed: &PrecommitResult,
        signature: IdentitySignature,
    ) -> Self {
        Self {
            tld: precommit.tld.clone(),
            subdomain: precommit.subdomain.clone(),
            record: precommit.record.clone(),
            offset: precommit.offset,
            truncate: precommit.truncate,
            date: sealed.envelope.timestamp,
            sealed_hash: sealed.sealed_hash.clone(),
            refhash: sealed.refhash.clone(),
            signature,
        }
    }

    pub fn identity(&self) -> Result<Identity> {
        Identity::with_subdomain(&self.tld, &self.subdomain)
    }
}

/// Payload of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub refhash: RefHash,
    /// Tip of the log after the append, when the relayer reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u64>,
    /// True if records were dropped before appending.
    #[serde(default)]
    pub truncated: bool,
}

/// Payload of `GET /blob/:name/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Number of records in the log; the next append goes here.
    pub offset: u64,
}

// =============================================================================
// Sealing
// =============================================================================

/// Computes `(refhash, sealed_hash)` for a record at a log position.
///
/// This is the sealing rule of the bundled relayer. The refhash covers the
/// author, the record and its timestamp; the sealed hash additionally binds the
/// refhash to the offset, so a signature cannot be replayed at another
/// position.
pub fn seal(
    identity: &Identity,
    record: &AppendRecord,
    offset: u64,
    timestamp: u64,
) -> Result<(RefHash, SealedHash)> {
    let record_bytes = record.canonical_bytes()?;
    let refhash = hash_parts(
        REFHASH_DOMAIN,
        &[
            identity.tld.as_bytes(),
            identity.subdomain.as_bytes(),
            &record_bytes,
            &timestamp.to_be_bytes(),
        ],
    );
    let sealed = hash_parts(SEALED_HASH_DOMAIN, &[&refhash, &offset.to_be_bytes()]);
    Ok((RefHash::from_bytes(&refhash), SealedHash::new(sealed.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKey;
    use crate::log::record::{ConnectionRecord, PostRecord};
    use serde_json::json;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    #[test]
    fn test_seal_is_deterministic() {
        let record = AppendRecord::from(PostRecord::new("hello"));
        let a = seal(&alice(), &record, 5, 1_700_000_000_000).unwrap();
        let b = seal(&alice(), &record, 5, 1_700_000_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seal_binds_offset_and_time() {
        let record = AppendRecord::from(PostRecord::new("hello"));
        let (ref_a, sealed_a) = seal(&alice(), &record, 5, 1).unwrap();
        let (ref_b, sealed_b) = seal(&alice(), &record, 6, 1).unwrap();
        assert_eq!(ref_a, ref_b);
        assert!(!sealed_a.matches(&sealed_b));

        let (ref_c, _) = seal(&alice(), &record, 5, 2).unwrap();
        assert_ne!(ref_a, ref_c);
    }

    #[test]
    fn test_precommit_body_shape() {
        let req = PrecommitRequest::new(
            &alice(),
            ConnectionRecord::follow("bob").into(),
            7,
            false,
        );
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "tld": "alice.",
                "subdomain": "",
                "connection": {"type": "FOLLOW", "tld": "bob."},
                "offset": 7
            })
        );

        let truncating = PrecommitRequest { truncate: true, ..req };
        assert_eq!(serde_json::to_value(&truncating).unwrap()["truncate"], json!(true));
    }

    #[test]
    fn test_commit_body_roundtrip() {
        let req = PrecommitRequest::new(&alice(), PostRecord::new("x").into(), 0, false);
        let (refhash, sealed_hash) = seal(&alice(), &req.record, 0, 42).unwrap();
        let sealed = PrecommitResult {
            refhash,
            sealed_hash,
            envelope: Envelope { timestamp: 42 },
        };
        let key = IdentityKey::generate();
        let commit = CommitRequest::new(&req, &sealed, key.sign(sealed.sealed_hash.as_bytes()));

        let value = serde_json::to_value(&commit).unwrap();
        assert_eq!(value["date"], json!(42));
        assert_eq!(value["sealedHash"], json!(sealed.sealed_hash.to_hex()));
        assert!(value["sig"].is_string());

        let parsed: CommitRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn test_refhash_validation() {
        assert!(RefHash::new("").is_err());
        assert!(RefHash::new("xyz").is_err());
        assert_eq!(RefHash::new("ABCD").unwrap().as_str(), "abcd");
    }
}
