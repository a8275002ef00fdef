use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

pub type Vector = Vec<f32>;

/// Arbitrary JSON object attached to a point
pub type Payload = Map<String, JsonValue>;

/// Identifier of a point, unique within a collection.
///
/// Serialized as a bare JSON number or string, as the server expects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl From<u64> for PointId {
    fn from(id: u64) -> Self {
        Self::Num(id)
    }
}

impl From<Uuid> for PointId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id.to_string())
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(id) => write!(f, "{}", id),
            Self::Uuid(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PointStruct {
    pub id: PointId,
    pub vector: Vector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

/// A contiguous slice of the uploaded points, in columnar form.
///
/// `offset` is the position of the first point in the whole upload, it is not sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    #[serde(skip)]
    pub offset: usize,
    pub ids: Vec<PointId>,
    pub vectors: Vec<Vector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payloads: Option<Vec<Payload>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row view of the batch, one `PointStruct` per point
    pub fn into_points(self) -> Vec<PointStruct> {
        let payloads = match self.payloads {
            Some(payloads) => payloads.into_iter().map(Some).collect(),
            None => vec![None; self.ids.len()],
        };

        self.ids
            .into_iter()
            .zip(self.vectors)
            .zip(payloads)
            .map(|((id, vector), payload)| PointStruct {
                id,
                vector,
                payload,
            })
            .collect()
    }
}

/// A point as retrieved by id
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub id: PointId,
    pub payload: Option<Payload>,
    pub vector: Option<Vector>,
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScoredPoint {
    pub id: PointId,
    #[serde(default)]
    pub version: u64,
    pub score: f32,
    pub payload: Option<Payload>,
    pub vector: Option<Vector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Accepted, applied later by the server
    Acknowledged,
    /// Applied before the response, with the `wait` flag
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpdateResult {
    pub operation_id: Option<u64>,
    pub status: UpdateStatus,
}
