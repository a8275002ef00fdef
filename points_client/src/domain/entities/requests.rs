use serde::{Deserialize, Serialize};

use super::{
    filter::Filter,
    point::{Batch, Payload, PointId, PointStruct, Vector},
};

/// Body of an upsert, either row or columnar form
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointInsertOperations {
    Points(Vec<PointStruct>),
    Batch(Batch),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRequest {
    pub ids: Vec<PointId>,
    pub with_payload: bool,
    pub with_vector: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetPayload {
    pub payload: Payload,
    pub points: Vec<PointId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointsSelector {
    pub points: Vec<PointId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub vector: Vector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub limit: usize,
    pub with_payload: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub with_vector: bool,
}

impl SearchRequest {
    pub fn new(vector: Vector, limit: usize) -> Self {
        Self {
            vector,
            filter: None,
            limit,
            with_payload: false,
            with_vector: false,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_payload(mut self, with_payload: bool) -> Self {
        self.with_payload = with_payload;
        self
    }

    pub fn with_vector(mut self, with_vector: bool) -> Self {
        self.with_vector = with_vector;
        self
    }
}

/// Wrapper of every response of the REST api
#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub result: T,
    pub status: String,
    pub time: f64,
}

/// Body of an error response: `{"status": {"error": "..."}}`
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub status: ErrorStatus,
}

#[derive(Debug, Deserialize)]
pub struct ErrorStatus {
    pub error: String,
}
