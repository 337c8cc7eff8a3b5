//! Business logic services

pub mod blob_store;
pub mod import;
