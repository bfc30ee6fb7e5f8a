//! Vellum Media Service
//!
//! Upload-and-processing pipeline: resumable and direct video ingest,
//! codec-aware HLS transcoding, object-store publication, and webhook
//! notification, driven by a durable job queue.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod services;
pub mod worker;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
