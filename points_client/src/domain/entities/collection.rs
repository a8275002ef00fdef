use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VectorParams {
    pub size: u64,
    pub distance: Distance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateCollection {
    pub vectors: VectorParams,
}

impl CreateCollection {
    pub fn new(vector_size: u64, distance: Distance) -> Self {
        Self {
            vectors: VectorParams {
                size: vector_size,
                distance,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CollectionDescription {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CollectionsResponse {
    pub collections: Vec<CollectionDescription>,
}

/// Collection metadata returned by the server.
///
/// Only the fields the client relies on are typed, the rest stays as JSON.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectionInfo {
    pub status: String,
    pub points_count: Option<u64>,
    pub indexed_vectors_count: Option<u64>,
    #[serde(default)]
    pub config: JsonValue,
    #[serde(default)]
    pub payload_schema: JsonValue,
}

/// Type of a payload index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSchemaType {
    Keyword,
    Integer,
    Float,
    Bool,
    Geo,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateFieldIndex {
    pub field_name: String,
    pub field_schema: PayloadSchemaType,
}
