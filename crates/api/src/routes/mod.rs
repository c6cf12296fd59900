//! HTTP routes

pub mod ingest;
pub mod programs;
pub mod status;
