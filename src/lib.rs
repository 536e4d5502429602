pub mod apis;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod types;

// Ports and their adapters
pub mod app;
pub mod infra;
