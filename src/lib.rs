#![forbid(unsafe_code)]

pub mod api;
pub mod artifact;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod transport;

pub use config::ServerConfig;
pub use errors::{AppError, Result};
