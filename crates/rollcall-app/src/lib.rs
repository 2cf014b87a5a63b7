// Library root: re-exports all modules so integration tests and the binary
// share one public API.

pub mod app;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod protocol;
