use std::time::Duration;

use async_trait::async_trait;
use common::helper::error_chain_fmt;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method, StatusCode, Url,
};
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{
    domain::entities::{
        collection::{
            CollectionDescription, CollectionInfo, CollectionsResponse, CreateCollection,
            CreateFieldIndex, Distance, PayloadSchemaType,
        },
        point::{Batch, Payload, PointId, PointStruct, Record, ScoredPoint, UpdateResult},
        requests::{
            ErrorEnvelope, PointInsertOperations, PointRequest, PointsSelector, ResponseEnvelope,
            SearchRequest, SetPayload,
        },
    },
    ports::points_repository::{PointsRepository, PointsRepositoryError},
};

/// Collections and points of a Qdrant server, through its REST api
///
/// Cheap to clone: the underlying `reqwest::Client` shares its connection pool.
#[derive(Clone, Debug)]
pub struct QdrantHttpRepository {
    client: reqwest::Client,
    base_url: Url,
}

impl QdrantHttpRepository {
    /// Builds the repository, no request is sent
    ///
    /// The api key, if any, is sent with every request in the `api-key` header.
    pub fn try_new(
        base_url: &str,
        api_key: Option<&Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, QdrantHttpRepositoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| QdrantHttpRepositoryError::InvalidConfiguration(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(QdrantHttpRepositoryError::InvalidConfiguration(format!(
                "{} cannot be used as a base url",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(api_key) = api_key {
            let mut value = HeaderValue::from_str(api_key.expose_secret()).map_err(|_| {
                QdrantHttpRepositoryError::InvalidConfiguration(
                    "api key is not a valid header value".into(),
                )
            })?;
            value.set_sensitive(true);
            headers.insert("api-key", value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    #[tracing::instrument(name = "Listing collections", skip(self))]
    pub async fn list_collections(
        &self,
    ) -> Result<Vec<CollectionDescription>, QdrantHttpRepositoryError> {
        let response: CollectionsResponse = self
            .send(Method::GET, &["collections"], None, None::<&()>)
            .await?;

        Ok(response.collections)
    }

    #[tracing::instrument(name = "Getting collection info", skip(self))]
    pub async fn get_collection(
        &self,
        collection_name: &str,
    ) -> Result<CollectionInfo, QdrantHttpRepositoryError> {
        self.send(
            Method::GET,
            &["collections", collection_name],
            None,
            None::<&()>,
        )
        .await
    }

    /// Creates a collection, fails if it already exists
    #[tracing::instrument(name = "Creating collection", skip(self))]
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
        distance: Distance,
    ) -> Result<bool, QdrantHttpRepositoryError> {
        let created = self
            .send(
                Method::PUT,
                &["collections", collection_name],
                None,
                Some(&CreateCollection::new(vector_size, distance)),
            )
            .await?;

        info!(created, "Created collection");
        Ok(created)
    }

    /// Deletes a collection, returns whether it existed
    #[tracing::instrument(name = "Deleting collection", skip(self))]
    pub async fn delete_collection(
        &self,
        collection_name: &str,
    ) -> Result<bool, QdrantHttpRepositoryError> {
        match self
            .send(
                Method::DELETE,
                &["collections", collection_name],
                None,
                None::<&()>,
            )
            .await
        {
            Ok(deleted) => Ok(deleted),
            Err(QdrantHttpRepositoryError::ServerError { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Deletes the collection if it exists, and creates it empty
    #[tracing::instrument(name = "Recreating collection", skip(self))]
    pub async fn recreate_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
        distance: Distance,
    ) -> Result<bool, QdrantHttpRepositoryError> {
        let deleted = self.delete_collection(collection_name).await?;
        debug!(deleted, "Deleted previous collection");

        self.create_collection(collection_name, vector_size, distance)
            .await
    }

    /// Asks the server to index a payload field, so filters on it are faster
    #[tracing::instrument(name = "Creating payload index", skip(self))]
    pub async fn create_payload_index(
        &self,
        collection_name: &str,
        field_name: &str,
        field_schema: PayloadSchemaType,
        wait: bool,
    ) -> Result<UpdateResult, QdrantHttpRepositoryError> {
        self.send(
            Method::PUT,
            &["collections", collection_name, "index"],
            Some(wait),
            Some(&CreateFieldIndex {
                field_name: field_name.to_string(),
                field_schema,
            }),
        )
        .await
    }

    /// Inserts or replaces points by id
    #[tracing::instrument(name = "Upserting points", skip(self, points), fields(points = points.len()))]
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<PointStruct>,
        wait: bool,
    ) -> Result<UpdateResult, QdrantHttpRepositoryError> {
        self.send(
            Method::PUT,
            &["collections", collection_name, "points"],
            Some(wait),
            Some(&PointInsertOperations::Points(points)),
        )
        .await
    }

    /// Inserts or replaces points by id, in the columnar form
    #[tracing::instrument(
        name = "Upserting batch of points",
        skip(self, batch),
        fields(offset = batch.offset, points = batch.len())
    )]
    pub async fn upsert_points_batch(
        &self,
        collection_name: &str,
        batch: Batch,
        wait: bool,
    ) -> Result<UpdateResult, QdrantHttpRepositoryError> {
        self.send(
            Method::PUT,
            &["collections", collection_name, "points"],
            Some(wait),
            Some(&PointInsertOperations::Batch(batch)),
        )
        .await
    }

    /// Retrieves points by id, unknown ids are left out of the result
    #[tracing::instrument(name = "Getting points", skip(self))]
    pub async fn get_points(
        &self,
        collection_name: &str,
        ids: Vec<PointId>,
        with_vector: bool,
    ) -> Result<Vec<Record>, QdrantHttpRepositoryError> {
        self.send(
            Method::POST,
            &["collections", collection_name, "points"],
            None,
            Some(&PointRequest {
                ids,
                with_payload: true,
                with_vector,
            }),
        )
        .await
    }

    /// Sets the given payload fields on the points, other fields are kept
    #[tracing::instrument(name = "Setting payload", skip(self, payload))]
    pub async fn set_payload(
        &self,
        collection_name: &str,
        payload: Payload,
        ids: Vec<PointId>,
        wait: bool,
    ) -> Result<UpdateResult, QdrantHttpRepositoryError> {
        self.send(
            Method::POST,
            &["collections", collection_name, "points", "payload"],
            Some(wait),
            Some(&SetPayload {
                payload,
                points: ids,
            }),
        )
        .await
    }

    #[tracing::instrument(name = "Deleting points", skip(self))]
    pub async fn delete_points(
        &self,
        collection_name: &str,
        ids: Vec<PointId>,
        wait: bool,
    ) -> Result<UpdateResult, QdrantHttpRepositoryError> {
        self.send(
            Method::POST,
            &["collections", collection_name, "points", "delete"],
            Some(wait),
            Some(&PointsSelector { points: ids }),
        )
        .await
    }

    /// Closest points to the request vector, by descending score
    #[tracing::instrument(
        name = "Searching points",
        skip(self, request),
        fields(limit = request.limit, filtered = request.filter.is_some())
    )]
    pub async fn search(
        &self,
        collection_name: &str,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredPoint>, QdrantHttpRepositoryError> {
        self.send(
            Method::POST,
            &["collections", collection_name, "points", "search"],
            None,
            Some(request),
        )
        .await
    }

    /// Sends a request and unwraps the `result` of the response envelope
    ///
    /// Path segments are percent-encoded, so collection names can hold any character.
    async fn send<Body: Serialize, Response: DeserializeOwned>(
        &self,
        method: Method,
        path: &[&str],
        wait: Option<bool>,
        body: Option<&Body>,
    ) -> Result<Response, QdrantHttpRepositoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                QdrantHttpRepositoryError::InvalidConfiguration(format!(
                    "{} cannot be used as a base url",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(path);
        if let Some(wait) = wait {
            url.query_pairs_mut()
                .append_pair("wait", if wait { "true" } else { "false" });
        }

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Error responses are not always enveloped, ex: from a proxy
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.status.error)
                .unwrap_or(text);
            return Err(QdrantHttpRepositoryError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ResponseEnvelope<Response> = serde_json::from_str(&text)
            .map_err(|e| QdrantHttpRepositoryError::InvalidResponse(e, text))?;
        debug!(%method, %url, time = envelope.time, "Request done");

        Ok(envelope.result)
    }
}

#[async_trait]
impl PointsRepository for QdrantHttpRepository {
    async fn upsert_batch(
        &self,
        collection_name: &str,
        batch: Batch,
        wait: bool,
    ) -> Result<UpdateResult, PointsRepositoryError> {
        Ok(self
            .upsert_points_batch(collection_name, batch, wait)
            .await?)
    }
}

#[derive(thiserror::Error)]
pub enum QdrantHttpRepositoryError {
    #[error("Failed to reach Qdrant")]
    Transport(#[from] reqwest::Error),
    #[error("Error from Qdrant ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("Invalid response from Qdrant: {0}. Response: {1}")]
    InvalidResponse(#[source] serde_json::Error, String),
    #[error("Invalid Qdrant client configuration: {0}")]
    InvalidConfiguration(String),
}

impl std::fmt::Debug for QdrantHttpRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<QdrantHttpRepositoryError> for PointsRepositoryError {
    fn from(error: QdrantHttpRepositoryError) -> Self {
        match error {
            QdrantHttpRepositoryError::ServerError { status, message } => {
                Self::Rejected { status, message }
            }
            QdrantHttpRepositoryError::InvalidResponse(..) => Self::InvalidResponse(Box::new(error)),
            QdrantHttpRepositoryError::Transport(_)
            | QdrantHttpRepositoryError::InvalidConfiguration(_) => Self::Unreachable(Box::new(error)),
        }
    }
}
