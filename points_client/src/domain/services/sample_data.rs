use std::path::Path;

use rand::Rng;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{
    entities::point::{Payload, Vector},
    services::vector_file_source::{VectorFileSource, VectorFileSourceError},
};

/// Lazily generated payloads, the n-th one holding `id = first_id + n`
///
/// Each payload has a text, a random number in `[0, 1)` and an array of texts,
/// enough to exercise indexes and filters.
pub fn random_payloads(count: usize, first_id: u64) -> impl Iterator<Item = Payload> + Send {
    (0..count as u64).map(move |n| {
        let mut rng = rand::thread_rng();
        let mut payload = Payload::new();
        payload.insert("id".into(), json!(first_id + n));
        payload.insert("text_data".into(), json!(Uuid::new_v4().simple().to_string()));
        payload.insert("rand_number".into(), json!(rng.gen::<f64>()));
        payload.insert(
            "text_array".into(),
            json!([
                Uuid::new_v4().simple().to_string(),
                Uuid::new_v4().simple().to_string()
            ]),
        );
        payload
    })
}

pub fn random_vector(dim: usize) -> Vector {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen::<f32>()).collect()
}

/// Writes `count` random vectors to a raw vectors file, to be streamed back by `VectorFileSource`
pub fn stage_random_vectors(
    path: impl AsRef<Path>,
    count: usize,
    dim: usize,
) -> Result<usize, VectorFileSourceError> {
    VectorFileSource::write_rows(path, (0..count).map(|_| random_vector(dim)))
}
