// Core modules
pub mod api;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod execution;
pub mod indicators;
pub mod logging;
pub mod models;
pub mod notify;
pub mod repair;
pub mod scanner;
pub mod sizing;
pub mod strategy;
pub mod wallet;

// Re-export commonly used types
pub use api::{Exchange, ExchangeError};
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
