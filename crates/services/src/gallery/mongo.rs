use std::collections::HashMap;

use async_trait::async_trait;
use bson::{DateTime, doc, oid::ObjectId};
use futures::TryStreamExt;
use koegate_db::models::{DigitCentroid, Speaker};
use mongodb::{Client, ClientSession, Collection, Database};
use tracing::{debug, info};

use crate::pin::PinHasher;

use super::{GalleryError, GalleryStore, NewSpeaker, SpeakerGallery, validate_centroids};

/// MongoDB-backed gallery.
///
/// Commit runs inside a client-session transaction so the speaker document
/// and its ten centroid documents land atomically; the unique index on
/// `speaker_id` turns a duplicate enrollment into `SpeakerAlreadyExists`.
pub struct MongoGalleryStore {
    client: Client,
    speakers: Collection<Speaker>,
    centroids: Collection<DigitCentroid>,
}

impl MongoGalleryStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            speakers: db.collection(Speaker::COLLECTION),
            centroids: db.collection(DigitCentroid::COLLECTION),
        }
    }

    async fn find_speaker(&self, speaker_id: &str) -> Result<Speaker, GalleryError> {
        self.speakers
            .find_one(doc! { "speaker_id": speaker_id })
            .await
            .map_err(storage)?
            .ok_or(GalleryError::SpeakerNotFound)
    }

    async fn commit_in_session(
        &self,
        session: &mut ClientSession,
        speaker: &NewSpeaker,
    ) -> Result<(), GalleryError> {
        let now = DateTime::now();
        let doc = Speaker {
            id: None,
            speaker_id: speaker.speaker_id.clone(),
            speaker_name: speaker.speaker_name.clone(),
            pin: speaker.pin.clone(),
            created_at: now,
        };

        let inserted = self
            .speakers
            .insert_one(&doc)
            .session(&mut *session)
            .await
            .map_err(map_insert_error)?;
        let speaker_oid: ObjectId = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| GalleryError::Storage("inserted_id is not an ObjectId".to_string()))?;

        let rows: Vec<DigitCentroid> = speaker
            .centroids
            .iter()
            .map(|(digit, embedding)| DigitCentroid {
                id: None,
                speaker_id: speaker_oid,
                digit: digit.clone(),
                embedding: DigitCentroid::encode_embedding(embedding),
                created_at: now,
            })
            .collect();

        self.centroids
            .insert_many(rows)
            .session(session)
            .await
            .map_err(map_insert_error)?;

        Ok(())
    }
}

#[async_trait]
impl GalleryStore for MongoGalleryStore {
    async fn exists(&self, speaker_id: &str) -> Result<bool, GalleryError> {
        let found = self
            .speakers
            .find_one(doc! { "speaker_id": speaker_id })
            .await
            .map_err(storage)?;
        Ok(found.is_some())
    }

    async fn commit(&self, speaker: NewSpeaker) -> Result<(), GalleryError> {
        validate_centroids(&speaker.centroids)?;

        let mut session = self.client.start_session().await.map_err(storage)?;
        session.start_transaction().await.map_err(storage)?;

        match self.commit_in_session(&mut session, &speaker).await {
            Ok(()) => {
                session.commit_transaction().await.map_err(storage)?;
                info!(speaker_id = %speaker.speaker_id, "speaker gallery committed");
                Ok(())
            }
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }

    async fn load(&self, speaker_id: &str) -> Result<SpeakerGallery, GalleryError> {
        let speaker = self.find_speaker(speaker_id).await?;
        let speaker_oid = speaker
            .id
            .ok_or_else(|| GalleryError::Storage("speaker document without _id".to_string()))?;

        let mut cursor = self
            .centroids
            .find(doc! { "speaker_id": speaker_oid })
            .await
            .map_err(storage)?;

        let mut centroids: HashMap<String, Vec<f32>> = HashMap::new();
        while let Some(row) = cursor.try_next().await.map_err(storage)? {
            centroids.insert(row.digit.clone(), DigitCentroid::decode_embedding(&row.embedding));
        }

        validate_centroids(&centroids)?;
        debug!(speaker_id, digits = centroids.len(), "gallery loaded");

        Ok(SpeakerGallery {
            speaker_id: speaker.speaker_id,
            speaker_name: speaker.speaker_name,
            has_pin: speaker.pin.is_some(),
            centroids,
        })
    }

    async fn verify_pin(&self, speaker_id: &str, pin: &str) -> Result<bool, GalleryError> {
        let speaker = self.find_speaker(speaker_id).await?;
        let stored = speaker.pin.as_ref().ok_or(GalleryError::PinNotSet)?;
        Ok(PinHasher::verify(pin, stored))
    }
}

fn storage(e: mongodb::error::Error) -> GalleryError {
    GalleryError::Storage(e.to_string())
}

fn map_insert_error(e: mongodb::error::Error) -> GalleryError {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_error,
    )) = *e.kind
    {
        if write_error.code == 11000 {
            return GalleryError::SpeakerAlreadyExists;
        }
    }
    if let mongodb::error::ErrorKind::InsertMany(ref failure) = *e.kind {
        if failure
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.values().any(|we| we.code == 11000))
        {
            return GalleryError::SpeakerAlreadyExists;
        }
    }
    storage(e)
}
