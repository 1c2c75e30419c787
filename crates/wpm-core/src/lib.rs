pub mod cache;
pub mod config;
pub mod engine;
pub mod execution;
pub mod manager;
pub mod models;
pub mod native;
pub mod parsing;
pub mod sources;

pub use config::DiscoveryConfig;
pub use manager::WinGetManager;
