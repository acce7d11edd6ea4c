//! Error types for executorch-bridge.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::sys;

/// Result type alias for executorch-bridge operations.
pub type Result<T> = std::result::Result<T, ExecutorchError>;

/// Failure status reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Internal,
    InvalidState,
    EndOfMethod,
    NotSupported,
    NotImplemented,
    InvalidArgument,
    InvalidType,
    OperatorMissing,
    NotFound,
    MemoryAllocationFailed,
    AccessFailed,
    InvalidProgram,
    InvalidExternalData,
    OutOfResources,
    DelegateInvalidCompatibility,
    DelegateMemoryAllocationFailed,
    DelegateInvalidHandle,
}

/// Broad class of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    System,
    Logical,
    Resource,
    Delegate,
}

impl ErrorCode {
    /// `None` for [`sys::Error::Ok`].
    pub fn from_status(status: sys::Error) -> Option<Self> {
        use sys::Error as S;
        Some(match status {
            S::Ok => return None,
            S::Internal => Self::Internal,
            S::InvalidState => Self::InvalidState,
            S::EndOfMethod => Self::EndOfMethod,
            S::NotSupported => Self::NotSupported,
            S::NotImplemented => Self::NotImplemented,
            S::InvalidArgument => Self::InvalidArgument,
            S::InvalidType => Self::InvalidType,
            S::OperatorMissing => Self::OperatorMissing,
            S::NotFound => Self::NotFound,
            S::MemoryAllocationFailed => Self::MemoryAllocationFailed,
            S::AccessFailed => Self::AccessFailed,
            S::InvalidProgram => Self::InvalidProgram,
            S::InvalidExternalData => Self::InvalidExternalData,
            S::OutOfResources => Self::OutOfResources,
            S::DelegateInvalidCompatibility => Self::DelegateInvalidCompatibility,
            S::DelegateMemoryAllocationFailed => Self::DelegateMemoryAllocationFailed,
            S::DelegateInvalidHandle => Self::DelegateInvalidHandle,
        })
    }

    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            Internal | InvalidState | EndOfMethod => ErrorCategory::System,
            NotSupported | NotImplemented | InvalidArgument | InvalidType | OperatorMissing => {
                ErrorCategory::Logical
            }
            NotFound | MemoryAllocationFailed | AccessFailed | InvalidProgram | InvalidExternalData
            | OutOfResources => ErrorCategory::Resource,
            DelegateInvalidCompatibility | DelegateMemoryAllocationFailed | DelegateInvalidHandle => {
                ErrorCategory::Delegate
            }
        }
    }

    fn description(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Internal => "internal error",
            InvalidState => "invalid state",
            EndOfMethod => "end of method",
            NotSupported => "not supported",
            NotImplemented => "not implemented",
            InvalidArgument => "invalid argument",
            InvalidType => "invalid type",
            OperatorMissing => "operator missing",
            NotFound => "not found",
            MemoryAllocationFailed => "memory allocation failed",
            AccessFailed => "access failed",
            InvalidProgram => "invalid program",
            InvalidExternalData => "invalid external data",
            OutOfResources => "out of resources",
            DelegateInvalidCompatibility => "delegate version incompatible",
            DelegateMemoryAllocationFailed => "delegate memory allocation failed",
            DelegateInvalidHandle => "invalid delegate handle",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for ErrorCode {}

/// Errors that can occur while loading or running a program.
#[derive(Debug, Error)]
pub enum ExecutorchError {
    /// The executor reported a failure.
    #[error("Executor error: {0}")]
    Runtime(#[from] ErrorCode),

    /// Invalid tensor.
    #[error("Invalid tensor: {0}")]
    Tensor(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl ExecutorchError {
    /// Create a tensor error.
    pub fn tensor(msg: impl Into<String>) -> Self {
        Self::Tensor(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The executor status behind this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Runtime(code) => Some(*code),
            _ => None,
        }
    }
}

/// Turns a status returned through the C ABI into a `Result`.
pub(crate) fn check(status: sys::Error) -> Result<()> {
    match ErrorCode::from_status(status) {
        None => Ok(()),
        Some(code) => Err(code.into()),
    }
}
