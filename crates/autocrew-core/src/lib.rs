//! autocrew core
//!
//! Per-worker orchestration for autonomous coding agents:
//! - `agent` - backend-agnostic agent execution with retry/backoff and the registry
//! - `hooks` - lifecycle hook executor (init/start/stop/error)
//! - `tracker` - upstream tracker client and pending-work aggregation
//! - `monitor` - the polling control loop
//! - `workspace` - the on-disk checkout the agent works in

pub mod agent;
pub mod config;
pub mod hooks;
pub mod mcp;
pub mod monitor;
pub mod paths;
pub mod process;
pub mod tracker;
pub mod workspace;

pub use config::{ConfigError, WorkerConfig};
