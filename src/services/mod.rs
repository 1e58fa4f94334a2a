pub mod blob_store;
pub mod file_repo;
