pub mod points_repository;
