pub mod qdrant_http_repository;
