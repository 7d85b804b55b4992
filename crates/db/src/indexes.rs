use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

use crate::models::{DigitCentroid, Speaker};

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Speakers
    create_indexes(
        db,
        Speaker::COLLECTION,
        vec![index_unique(bson::doc! { "speaker_id": 1 })],
    )
    .await?;

    // Digit centroids
    create_indexes(
        db,
        DigitCentroid::COLLECTION,
        vec![
            index_unique(bson::doc! { "speaker_id": 1, "digit": 1 }),
            index(bson::doc! { "speaker_id": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
