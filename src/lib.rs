//! Orchestration core for a desktop automation platform: a
//! long-running supervisor that loads declarative workflow definitions,
//! dispatches their steps to worker subprocesses over a line-delimited JSON
//! channel, persists every state transition to an embedded SQL store, and
//! exposes a strictly read-only advisory subsystem behind a guardrail
//! policy.
//!
//! The binary entry point (`src/main.rs`) wires these modules together and
//! runs the parent-facing request loop; this library crate exists so the
//! components can be exercised directly in tests without going through the
//! stdio protocol.

pub mod advisory;
pub mod approval;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod guardrail;
pub mod input_mapping;
pub mod ipc;
pub mod ipc_loop;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod supervisor;
pub mod trigger;

pub use error::{OrchestratorError, OrchestratorResult};
