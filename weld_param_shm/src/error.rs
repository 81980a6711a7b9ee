//! Error types for parameter segment operations

use crate::catalog::{ElementType, ParameterId};
use std::time::Duration;
use thiserror::Error;

/// Segment validation failure reported by the version guard.
///
/// Both variants are fatal: the segment must not be touched beyond the two
/// version words until a compatible segment is attached.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// Segment was stamped with a different protocol version (or has a
    /// different layout size, which is treated the same way)
    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the reader was built against
        expected: u32,
        /// Version found in the segment
        found: u32,
    },

    /// Leading and trailing version words disagree
    #[error("Alignment corruption: version {version} != version2 {version2}")]
    AlignmentCorruption {
        /// Leading version word
        version: u32,
        /// Trailing version word
        version2: u32,
    },
}

/// Errors that can occur during parameter segment operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment version does not match the compiled protocol version
    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version
        expected: u32,
        /// Found version
        found: u32,
    },

    /// Version words disagree (ABI padding drift or torn write)
    #[error("Alignment corruption: version {version} != version2 {version2}")]
    AlignmentCorruption {
        /// Leading version word
        version: u32,
        /// Trailing version word
        version2: u32,
    },

    /// No commit arrived within the wait bound
    #[error("No parameter change within {waited:?}")]
    Timeout {
        /// Time spent waiting
        waited: Duration,
    },

    /// Identifier is outside the compiled catalog range
    #[error("Unknown parameter id: {id}")]
    UnknownParameterId {
        /// Offending identifier
        id: ParameterId,
    },

    /// Parameter is not active in the current configuration
    #[error("Parameter not used: {id}")]
    ParameterNotUsed {
        /// Parameter identifier
        id: ParameterId,
    },

    /// Value element type does not match the parameter slot
    #[error("Type mismatch for parameter {id}: slot holds {expected:?}")]
    TypeMismatch {
        /// Parameter identifier
        id: ParameterId,
        /// Element type of the slot
        expected: ElementType,
    },

    /// Extended entry kept changing across all read attempts
    #[error("Extended entry of parameter {id} changed during read - retry recommended")]
    ReadConflict {
        /// Parameter identifier
        id: ParameterId,
    },

    /// Segment is owned by a live writer
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl ShmError {
    /// Whether the error must propagate as an unrecoverable configuration
    /// error.
    ///
    /// Version and alignment failures mean the segment cannot be trusted,
    /// and an unknown id or a type mismatch means catalog/layout skew between
    /// builds. Timeouts, unused parameters and read conflicts are local and
    /// recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. }
                | Self::AlignmentCorruption { .. }
                | Self::UnknownParameterId { .. }
                | Self::TypeMismatch { .. }
        )
    }

    /// Whether the caller may retry or continue with stale values.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ParameterNotUsed { .. } | Self::ReadConflict { .. }
        )
    }
}

impl From<GuardError> for ShmError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::VersionMismatch { expected, found } => {
                Self::VersionMismatch { expected, found }
            }
            GuardError::AlignmentCorruption { version, version2 } => {
                Self::AlignmentCorruption { version, version2 }
            }
        }
    }
}

/// Result type for parameter segment operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_errors_convert_to_fatal_shm_errors() {
        let err: ShmError = GuardError::VersionMismatch {
            expected: 3,
            found: 2,
        }
        .into();
        assert!(matches!(
            err,
            ShmError::VersionMismatch {
                expected: 3,
                found: 2
            }
        ));
        assert!(err.is_fatal());

        let err: ShmError = GuardError::AlignmentCorruption {
            version: 3,
            version2: 4,
        }
        .into();
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn local_errors_are_recoverable() {
        let timeout = ShmError::Timeout {
            waited: Duration::from_millis(10),
        };
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_fatal());

        let unused = ShmError::ParameterNotUsed { id: ParameterId(4) };
        assert!(unused.is_recoverable());

        let unknown = ShmError::UnknownParameterId {
            id: ParameterId(9999),
        };
        assert!(unknown.is_fatal());
    }

    #[test]
    fn os_failures_surface_as_io_errors() {
        let err: ShmError = std::io::Error::from_raw_os_error(libc::EACCES).into();
        assert!(matches!(err, ShmError::Io { .. }));
        assert!(!err.is_fatal());
        assert!(!err.is_recoverable());
    }
}
