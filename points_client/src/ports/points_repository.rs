use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::domain::entities::point::{Batch, UpdateResult};

/// Store receiving the batches of a bulk upload
#[async_trait]
pub trait PointsRepository: Send + Sync {
    /// Inserts or replaces, by id, every point of the batch in the collection
    ///
    /// With `wait`, the store answers once the batch is applied.
    async fn upsert_batch(
        &self,
        collection_name: &str,
        batch: Batch,
        wait: bool,
    ) -> Result<UpdateResult, PointsRepositoryError>;
}

#[derive(thiserror::Error)]
pub enum PointsRepositoryError {
    #[error("Points store could not be reached")]
    Unreachable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Points store rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Points store answered with an unexpected response")]
    InvalidResponse(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Debug for PointsRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
