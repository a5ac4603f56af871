// Re-export modules for testing
pub mod backup;
pub mod config;
pub mod drive;
pub mod error;
pub mod notify;
pub mod panel;
pub mod relay;
