use bson::{Binary, DateTime, oid::ObjectId, spec::BinarySubtype};
use serde::{Deserialize, Serialize};

/// One reference embedding per (speaker, digit). A committed speaker always
/// has exactly ten of these covering digits "0".."9".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitCentroid {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub speaker_id: ObjectId,
    /// "0" to "9".
    pub digit: String,
    /// Packed little-endian f32 vector.
    pub embedding: Binary,
    pub created_at: DateTime,
}

impl DigitCentroid {
    pub const COLLECTION: &'static str = "digit_centroids";

    /// Packs an embedding into the stored byte form. Round-trips bit-exactly.
    pub fn encode_embedding(embedding: &[f32]) -> Binary {
        let mut bytes = Vec::with_capacity(embedding.len() * 4);
        for v in embedding {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Binary {
            subtype: BinarySubtype::Generic,
            bytes,
        }
    }

    /// Unpacks the stored byte form back into an embedding.
    pub fn decode_embedding(data: &Binary) -> Vec<f32> {
        data.bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}
