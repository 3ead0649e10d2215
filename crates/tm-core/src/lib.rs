//! Core types for cell-tm
//!
//! This crate provides the identifiers, error handling, configuration,
//! and logging infrastructure shared by the target manager tools.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::{Config, TimeoutPolicy};
pub use error::{ConfigError, InitiateError, LinkError, ResultCode, Result, TmError, TrackerError};
pub use ids::{OperationId, Pid, TargetId};
