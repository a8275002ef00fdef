use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    configuration::{QdrantSettings, Settings},
    domain::{
        entities::{
            collection::PayloadSchemaType,
            filter::{FieldCondition, Filter, Range},
            point::{Payload, PointId, PointStruct},
            requests::SearchRequest,
        },
        services::{
            batch_uploader::{BatchUploadError, BatchUploader, UploadInput, UploadOptions},
            sample_data::{random_payloads, random_vector, stage_random_vectors},
            vector_file_source::{VectorFileSource, VectorFileSourceError},
        },
    },
    repositories::qdrant_http_repository::{QdrantHttpRepository, QdrantHttpRepositoryError},
};

/// Payload field indexed and filtered on by the scenario
pub const FILTERED_FIELD: &str = "rand_number";

/// Holds the Qdrant repository and the uploader built from the settings
pub struct Application {
    settings: Settings,
    repository: Arc<QdrantHttpRepository>,
    uploader: BatchUploader<QdrantHttpRepository>,
}

impl Application {
    #[tracing::instrument(name = "Building client application", skip(settings))]
    pub fn build(settings: Settings) -> Result<Self, ApplicationError> {
        let repository = Arc::new(get_qdrant_repository(&settings.qdrant)?);
        let uploader = BatchUploader::new(
            repository.clone(),
            UploadOptions::from(&settings.upload),
        );

        Ok(Self {
            settings,
            repository,
            uploader,
        })
    }

    /// Runs the whole client scenario against the configured collection
    ///
    /// The collection is recreated, `points_count` generated points are streamed from a staged
    /// vectors file, a payload index is created, then plain and filtered searches and
    /// single point CRUD operations are run.
    #[tracing::instrument(name = "Running client scenario", skip(self))]
    pub async fn run_scenario(self, points_count: usize) -> Result<(), ApplicationError> {
        let collection = &self.settings.collection;
        let dim = collection.vector_size as usize;

        self.repository
            .recreate_collection(&collection.name, collection.vector_size, collection.distance)
            .await?;

        for description in self.repository.list_collections().await? {
            info!(?description, "Existing collection");
        }
        let info = self.repository.get_collection(&collection.name).await?;
        info!(?info, "Collection created");

        // Vectors are streamed from disk, never fully loaded
        let vectors_path =
            std::env::temp_dir().join(format!("points_client_{}.f32", Uuid::new_v4()));
        stage_random_vectors(&vectors_path, points_count, dim)?;
        let vectors = VectorFileSource::open(&vectors_path, dim)?;
        info!(rows = vectors.rows(), dim = vectors.dim(), "Streaming staged vectors");

        let upload_result = self
            .uploader
            .upload(
                &collection.name,
                UploadInput::from_fallible(vectors).with_payloads(random_payloads(points_count, 100)),
            )
            .await;
        if let Err(error) = std::fs::remove_file(&vectors_path) {
            warn!(?error, "Failed to remove staged vectors file");
        }
        let summary = upload_result?;
        info!(?summary, "Uploaded points");

        // Without `wait`, points are applied asynchronously by the server
        if !self.uploader.options().wait {
            sleep(Duration::from_secs(1)).await;
        }

        let index_result = self
            .repository
            .create_payload_index(&collection.name, FILTERED_FIELD, PayloadSchemaType::Float, true)
            .await?;
        info!(?index_result, "Created payload index");

        let info = self.repository.get_collection(&collection.name).await?;
        info!(?info, "Collection after upload");

        let query_vector = random_vector(dim);

        let hits = self
            .repository
            .search(
                &collection.name,
                &SearchRequest::new(query_vector.clone(), 5).with_payload(true),
            )
            .await?;
        for hit in &hits {
            info!(?hit, "Search result");
        }

        let threshold = Range::gte(0.5);
        let hits = self
            .repository
            .search(
                &collection.name,
                &SearchRequest::new(query_vector, 5)
                    .with_filter(Filter::must([
                        FieldCondition::range(FILTERED_FIELD, threshold).into()
                    ]))
                    .with_payload(true),
            )
            .await?;
        for hit in &hits {
            let value = hit
                .payload
                .as_ref()
                .and_then(|payload| payload.get(FILTERED_FIELD))
                .and_then(|value| value.as_f64());
            if !value.map_or(false, |value| threshold.contains(value)) {
                warn!(?hit, "Filtered search result does not match the filter");
            }
            info!(?hit, "Filtered search result (`rand_number` >= 0.5)");
        }

        self.run_points_crud().await
    }

    /// Creates, reads, updates and deletes a single point
    #[tracing::instrument(name = "Running points CRUD", skip(self))]
    async fn run_points_crud(&self) -> Result<(), ApplicationError> {
        let collection = &self.settings.collection;
        let id = PointId::Num(123);

        let mut payload = Payload::new();
        payload.insert("test".into(), json!("value"));
        self.repository
            .upsert_points(
                &collection.name,
                vec![PointStruct {
                    id: id.clone(),
                    vector: random_vector(collection.vector_size as usize),
                    payload: Some(payload),
                }],
                true,
            )
            .await?;

        let points = self
            .repository
            .get_points(&collection.name, vec![id.clone()], false)
            .await?;
        info!(?points, "Read a single point");

        let mut payload = Payload::new();
        payload.insert("test2".into(), json!(["value2", "value3"]));
        self.repository
            .set_payload(&collection.name, payload, vec![id.clone()], true)
            .await?;

        self.repository
            .delete_points(&collection.name, vec![id.clone()], true)
            .await?;

        let points = self
            .repository
            .get_points(&collection.name, vec![id], false)
            .await?;
        info!(remaining = points.len(), "Deleted a single point");

        Ok(())
    }
}

/// Sets up a client to Qdrant REST api
pub fn get_qdrant_repository(
    config: &QdrantSettings,
) -> Result<QdrantHttpRepository, QdrantHttpRepositoryError> {
    QdrantHttpRepository::try_new(
        &config.get_http_base_url(),
        config.api_key.as_ref(),
        config.timeout(),
    )
}

#[derive(thiserror::Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    QdrantHttpRepositoryError(#[from] QdrantHttpRepositoryError),
    #[error(transparent)]
    BatchUploadError(#[from] BatchUploadError),
    #[error(transparent)]
    VectorFileSourceError(#[from] VectorFileSourceError),
}
