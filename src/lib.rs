// ABOUTME: Library root for rollout - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod health;
pub mod hooks;
pub mod output;
pub mod proxy;
pub mod supervisor;
pub mod types;
