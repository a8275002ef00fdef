use std::time::Duration;

use points_client::{
    domain::entities::collection::{Distance, PayloadSchemaType},
    repositories::qdrant_http_repository::{QdrantHttpRepository, QdrantHttpRepositoryError},
};
use secrecy::Secret;
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer,
};

use crate::helpers::{init_test, qdrant_error, qdrant_ok, spawn_app, update_result, COLLECTION_NAME};

#[tokio::test]
async fn recreate_collection_deletes_then_creates_it_with_the_vector_params() {
    // Arrange
    let app = spawn_app().await;

    Mock::given(method("DELETE"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .respond_with(qdrant_ok(json!(true)))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .and(body_json(json!({"vectors": {"size": 100, "distance": "Cosine"}})))
        .respond_with(qdrant_ok(json!(true)))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;

    // Act
    let created = app
        .repository
        .recreate_collection(COLLECTION_NAME, 100, Distance::Cosine)
        .await
        .unwrap();

    // Assert
    assert!(created);
}

#[tokio::test]
async fn recreate_collection_creates_it_when_it_did_not_exist() {
    let app = spawn_app().await;

    Mock::given(method("DELETE"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .respond_with(qdrant_error(404, "Not found: Collection `client_test` doesn't exist!"))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .respond_with(qdrant_ok(json!(true)))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;

    let created = app
        .repository
        .recreate_collection(COLLECTION_NAME, 4, Distance::Dot)
        .await
        .unwrap();

    assert!(created);
}

#[tokio::test]
async fn create_collection_surfaces_the_server_error() {
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .respond_with(qdrant_error(
            400,
            "Wrong input: Collection `client_test` already exists!",
        ))
        .mount(&app.qdrant_server)
        .await;

    let error = app
        .repository
        .create_collection(COLLECTION_NAME, 100, Distance::Cosine)
        .await
        .unwrap_err();

    match error {
        QdrantHttpRepositoryError::ServerError { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("already exists"));
        }
        other => panic!("Expected a server error, got {:?}", other),
    }
}

#[tokio::test]
async fn list_collections_returns_their_names() {
    let app = spawn_app().await;

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(qdrant_ok(json!({
            "collections": [{"name": "client_test"}, {"name": "other"}]
        })))
        .mount(&app.qdrant_server)
        .await;

    let collections = app.repository.list_collections().await.unwrap();

    let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["client_test", "other"]);
}

#[tokio::test]
async fn get_collection_returns_its_info() {
    let app = spawn_app().await;

    Mock::given(method("GET"))
        .and(path(format!("/collections/{}", COLLECTION_NAME)))
        .respond_with(qdrant_ok(json!({
            "status": "green",
            "optimizer_status": "ok",
            "points_count": 1000,
            "indexed_vectors_count": 0,
            "segments_count": 2,
            "config": {"params": {"vectors": {"size": 100, "distance": "Cosine"}}},
            "payload_schema": {"rand_number": {"data_type": "float", "points": 1000}}
        })))
        .mount(&app.qdrant_server)
        .await;

    let info = app.repository.get_collection(COLLECTION_NAME).await.unwrap();

    assert_eq!(info.status, "green");
    assert_eq!(info.points_count, Some(1000));
    assert_eq!(info.config["params"]["vectors"]["size"], json!(100));
    assert_eq!(info.payload_schema["rand_number"]["data_type"], json!("float"));
}

#[tokio::test]
async fn collection_names_are_percent_encoded_in_the_path() {
    let app = spawn_app().await;

    Mock::given(method("GET"))
        .and(path("/collections/with%20space"))
        .respond_with(qdrant_ok(json!({"status": "green"})))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;

    let info = app.repository.get_collection("with space").await.unwrap();

    assert_eq!(info.status, "green");
}

#[tokio::test]
async fn create_payload_index_sends_field_name_and_schema() {
    let app = spawn_app().await;

    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/index", COLLECTION_NAME)))
        .and(query_param("wait", "true"))
        .and(body_json(json!({"field_name": "rand_number", "field_schema": "float"})))
        .respond_with(qdrant_ok(update_result("completed")))
        .expect(1)
        .mount(&app.qdrant_server)
        .await;

    let result = app
        .repository
        .create_payload_index(COLLECTION_NAME, "rand_number", PayloadSchemaType::Float, true)
        .await
        .unwrap();

    assert_eq!(result.operation_id, Some(1));
}

#[tokio::test]
async fn api_key_is_sent_with_every_request() {
    init_test();
    let qdrant_server = MockServer::start().await;
    let api_key = Secret::new("my-secret-key".to_string());
    let repository =
        QdrantHttpRepository::try_new(&qdrant_server.uri(), Some(&api_key), Duration::from_secs(5))
            .unwrap();

    Mock::given(method("GET"))
        .and(path("/collections"))
        .and(header("api-key", "my-secret-key"))
        .respond_with(qdrant_ok(json!({"collections": []})))
        .expect(1)
        .mount(&qdrant_server)
        .await;

    let collections = repository.list_collections().await.unwrap();

    assert!(collections.is_empty());
}

#[tokio::test]
async fn unreachable_server_is_reported_as_a_transport_error() {
    init_test();
    // Nothing listens on a port released right after being bound
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let uri = format!("http://127.0.0.1:{}", port);
    let repository = QdrantHttpRepository::try_new(&uri, None, Duration::from_secs(2)).unwrap();

    let error = repository.list_collections().await.unwrap_err();

    assert!(matches!(error, QdrantHttpRepositoryError::Transport(_)));
}

#[tokio::test]
async fn non_json_error_body_is_kept_as_the_message() {
    let app = spawn_app().await;

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(wiremock::ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&app.qdrant_server)
        .await;

    let error = app.repository.list_collections().await.unwrap_err();

    match error {
        QdrantHttpRepositoryError::ServerError { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "Bad Gateway");
        }
        other => panic!("Expected a server error, got {:?}", other),
    }
}
