//! Database queries

pub mod subject;
pub mod teacher;
