pub mod batch_uploader;
pub mod sample_data;
pub mod vector_file_source;
