use std::io;
use thiserror::Error;

use crate::common::msr::AccessError;

/// Exit code for usage and validation errors (matches clap's)
pub const EXIT_USAGE: u8 = 2;
/// Exit code when root privilege or the msr driver is missing
pub const EXIT_PRIVILEGE: u8 = 3;
/// Exit code for every other failure
pub const EXIT_FAILURE: u8 = 1;

#[derive(Error, Debug)]
pub enum PmuError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Topology discovery failed: {0}")]
    Topology(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON encoding failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PmuError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PmuError::InvalidArgument(msg.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            PmuError::InvalidArgument(_) => EXIT_USAGE,
            PmuError::Access(e) if e.is_environment() => EXIT_PRIVILEGE,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, PmuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PmuError::invalid("bad umask").exit_code(), EXIT_USAGE);
        assert_eq!(PmuError::Topology("x".into()).exit_code(), EXIT_FAILURE);

        let denied = PmuError::from(AccessError::PermissionDenied {
            core: 0,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(denied.exit_code(), EXIT_PRIVILEGE);

        let out_of_range = PmuError::from(AccessError::CoreOutOfRange {
            core: 9,
            available: 4,
        });
        assert_eq!(out_of_range.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_display() {
        let err = PmuError::invalid("PMU index 8 out of range");
        assert_eq!(err.to_string(), "Invalid argument: PMU index 8 out of range");
    }
}
