use bson::{Binary, DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// A registered identity. Created atomically with its ten digit centroids;
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Externally supplied identifier, unique across speakers.
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    /// Salted one-way PIN digest. The raw PIN is never stored.
    pub pin: Option<PinDigest>,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinDigest {
    /// Algorithm identifier, e.g. "sha256".
    pub algorithm: String,
    /// Per-speaker random salt.
    pub salt: Binary,
    /// H(salt || pin).
    pub digest: Binary,
}

impl Speaker {
    pub const COLLECTION: &'static str = "speakers";
}
