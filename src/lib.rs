//! Krill synchronizes RSS/Atom feeds into a deduplicated SQLite corpus of posts.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod feed;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod timez;
pub mod wrangle;

pub use error::{AppError, Result};

/// Crate version, stamped on every recorded job.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
