use std::collections::HashSet;

use fake::{faker::lorem::en::Sentence, Fake};
use points_client::domain::{
    entities::point::{Payload, PointId, Vector},
    services::{
        batch_uploader::{BatchUploadError, BatchUploader, UploadInput, UploadOptions},
        sample_data::stage_random_vectors,
        vector_file_source::VectorFileSource,
    },
};
use serde_json::{json, Value as JsonValue};
use wiremock::{
    matchers::{body_string_contains, method, path, query_param},
    Mock,
};

use crate::helpers::{qdrant_error, qdrant_ok, received_bodies, spawn_app, update_result, COLLECTION_NAME};

const DIM: usize = 4;

/// Vectors whose first component is their position in the input
fn positional_vectors(count: usize) -> Vec<Vector> {
    (0..count)
        .map(|position| {
            let mut vector = vec![0.0; DIM];
            vector[0] = position as f32;
            vector
        })
        .collect()
}

fn positional_payloads(count: usize) -> impl Iterator<Item = Payload> + Send {
    (0..count).map(|position| {
        let mut payload = Payload::new();
        payload.insert("position".into(), json!(position));
        payload.insert("text".into(), json!(Sentence(3..6).fake::<String>()));
        payload
    })
}

fn options(batch_size: usize, parallelism: usize) -> UploadOptions {
    UploadOptions {
        batch_size,
        parallelism,
        ..Default::default()
    }
}

fn batch_ids(body: &JsonValue) -> Vec<u64> {
    body["batch"]["ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| id.as_u64().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_sends_ceil_n_over_b_batches_covering_every_point_once() {
    // Arrange
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .and(query_param("wait", "false"))
        .respond_with(qdrant_ok(update_result("acknowledged")))
        // ceil(250 / 64)
        .expect(4)
        .mount(&app.qdrant_server)
        .await;

    let uploader = BatchUploader::new(app.repository.clone(), options(64, 3));

    // Act
    let summary = uploader
        .upload(COLLECTION_NAME, UploadInput::new(positional_vectors(250)))
        .await
        .unwrap();

    // Assert
    assert_eq!(summary.batches, 4);
    assert_eq!(summary.points, 250);

    let bodies = received_bodies(&app.qdrant_server).await;
    let mut sizes: Vec<usize> = bodies.iter().map(|body| batch_ids(body).len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![58, 64, 64, 64]);

    let ids: Vec<u64> = bodies.iter().flat_map(batch_ids).collect();
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 250);
    assert_eq!(unique, (0..250).collect());
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_keeps_each_payload_with_its_vector_whatever_the_parallelism() {
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .respond_with(qdrant_ok(update_result("acknowledged")))
        .mount(&app.qdrant_server)
        .await;

    let uploader = BatchUploader::new(app.repository.clone(), options(10, 8));

    uploader
        .upload(
            COLLECTION_NAME,
            UploadInput::new(positional_vectors(95)).with_payloads(positional_payloads(95)),
        )
        .await
        .unwrap();

    let mut seen = 0;
    for body in received_bodies(&app.qdrant_server).await {
        let batch = &body["batch"];
        let vectors = batch["vectors"].as_array().unwrap();
        let payloads = batch["payloads"].as_array().unwrap();
        assert_eq!(vectors.len(), payloads.len());

        for ((id, vector), payload) in batch_ids(&body).iter().zip(vectors).zip(payloads) {
            let position = vector[0].as_f64().unwrap() as u64;
            assert_eq!(*id, position);
            assert_eq!(payload["position"], json!(position));
            seen += 1;
        }
    }
    assert_eq!(seen, 95);
}

#[tokio::test]
async fn upload_uses_the_explicit_ids() {
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .and(query_param("wait", "true"))
        .respond_with(qdrant_ok(update_result("completed")))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;

    let ids = vec![
        PointId::Uuid("5c56c793-69f3-4fbf-87e6-c4bf54c28c26".into()),
        PointId::Num(42),
    ];
    let uploader = BatchUploader::new(
        app.repository.clone(),
        UploadOptions {
            wait: true,
            ..Default::default()
        },
    );

    uploader
        .upload(
            COLLECTION_NAME,
            UploadInput::new(positional_vectors(2)).with_ids(ids),
        )
        .await
        .unwrap();

    let bodies = received_bodies(&app.qdrant_server).await;
    assert_eq!(
        bodies[0]["batch"]["ids"],
        json!(["5c56c793-69f3-4fbf-87e6-c4bf54c28c26", 42])
    );
    assert!(bodies[0]["batch"].get("payloads").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_is_reported_and_other_batches_stay_applied() {
    let app = spawn_app().await;

    // The batch starting at position 20 is rejected
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .and(body_string_contains(r#""ids":[20,"#))
        .respond_with(qdrant_error(400, "Wrong input: Vector dimension error"))
        .with_priority(1)
        .expect(1)
        .mount(&app.qdrant_server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .respond_with(qdrant_ok(update_result("acknowledged")))
        .expect(3)
        .mount(&app.qdrant_server)
        .await;

    let uploader = BatchUploader::new(app.repository.clone(), options(10, 2));

    let error = uploader
        .upload(COLLECTION_NAME, UploadInput::new(positional_vectors(40)))
        .await
        .unwrap_err();

    let report = match error {
        BatchUploadError::PartialFailure(report) => report,
        other => panic!("Expected a partial failure, got {:?}", other),
    };
    assert_eq!(report.batches, 3);
    assert_eq!(report.points, 30);
    assert_eq!(report.failures.len(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.offset, 20);
    assert_eq!(
        failure.ids,
        (20..30u64).map(PointId::from).collect::<Vec<_>>()
    );
    assert!(failure.error.to_string().contains("400"));
}

#[tokio::test]
async fn vectors_streamed_from_a_file_are_uploaded() {
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", COLLECTION_NAME)))
        .respond_with(qdrant_ok(update_result("acknowledged")))
        .expect(3)
        .mount(&app.qdrant_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vectors_path = dir.path().join("vectors.f32");
    stage_random_vectors(&vectors_path, 25, DIM).unwrap();
    let vectors = VectorFileSource::open(&vectors_path, DIM).unwrap();

    let uploader = BatchUploader::new(app.repository.clone(), options(10, 2));
    let summary = uploader
        .upload(
            COLLECTION_NAME,
            UploadInput::from_fallible(vectors).with_payloads(positional_payloads(25)),
        )
        .await
        .unwrap();

    assert_eq!(summary.points, 25);
    for body in received_bodies(&app.qdrant_server).await {
        assert!(body["batch"]["vectors"]
            .as_array()
            .unwrap()
            .iter()
            .all(|vector| vector.as_array().unwrap().len() == DIM));
    }
}
