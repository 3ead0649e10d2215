//! Error types for cell-tm

use crate::ids::{OperationId, TargetId};
use thiserror::Error;

/// Main error type for target manager operations
#[derive(Error, Debug)]
pub enum TmError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Initiation failed: {0}")]
    Initiate(#[from] InitiateError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the notification link (the "Kick" side)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Target manager service is gone")]
    ServiceGone,

    #[error("Target {0} disconnected")]
    Disconnected(TargetId),

    #[error("Communications error: {0}")]
    Comms(String),
}

impl LinkError {
    /// Whether the polling loop must stop immediately
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ServiceGone)
    }
}

/// Synchronous failures of an initiating call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitiateError {
    #[error("Bad path: {0}")]
    BadPath(String),

    #[error("Bad target: {0}")]
    BadTarget(TargetId),

    #[error("Request refused: {0}")]
    Refused(ResultCode),

    #[error("Communications error: {0}")]
    Comms(String),

    #[error("Operation id {0} is already in flight")]
    DuplicateId(OperationId),
}

impl InitiateError {
    /// Vendor-style status equivalent of this failure
    pub fn code(&self) -> ResultCode {
        match self {
            Self::BadPath(_) => ResultCode::NO_FILE,
            Self::BadTarget(_) => ResultCode::NOT_CONNECTED,
            Self::Refused(code) => *code,
            Self::Comms(_) => ResultCode::COMMS_ERR,
            Self::DuplicateId(_) => ResultCode::BAD_PARAM,
        }
    }
}

/// Operation tracker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Operation {0} is already tracked")]
    DuplicateOperation(OperationId),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status code as returned by the target manager
///
/// Zero is success; failures are negative, following the vendor convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const OK: Self = Self(0);
    pub const NOT_IMPL: Self = Self(-1);
    pub const BAD_TARGET: Self = Self(-3);
    pub const NOT_CONNECTED: Self = Self(-4);
    pub const COMMS_ERR: Self = Self(-5);
    pub const BAD_PARAM: Self = Self(-9);
    pub const BUSY: Self = Self(-10);
    pub const TIMEOUT: Self = Self(-11);
    pub const NO_FILE: Self = Self(-15);
    pub const CANCELLED: Self = Self(-19);
    pub const SERVICE_GONE: Self = Self(-26);

    pub fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// Symbolic name for known codes
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::OK => "OK",
            Self::NOT_IMPL => "NOT_IMPL",
            Self::BAD_TARGET => "BAD_TARGET",
            Self::NOT_CONNECTED => "NOT_CONNECTED",
            Self::COMMS_ERR => "COMMS_ERR",
            Self::BAD_PARAM => "BAD_PARAM",
            Self::BUSY => "BUSY",
            Self::TIMEOUT => "TIMEOUT",
            Self::NO_FILE => "NO_FILE",
            Self::CANCELLED => "CANCELLED",
            Self::SERVICE_GONE => "SERVICE_GONE",
            _ => return None,
        })
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

/// Result type alias for target manager operations
pub type Result<T> = std::result::Result<T, TmError>;
