//! Migration-specific error types.

use super::state::ApplyReport;
use std::path::PathBuf;
use thiserror::Error;

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The migration store has not been initialized.
    #[error("migration store not initialized at {}", path.display())]
    NotInitialized {
        /// Store root.
        path: PathBuf,
    },

    /// The chain already has a root step.
    #[error("initial migration already exists (chain tip {tip})")]
    InitialExists {
        /// Current chain tip.
        tip: String,
    },

    /// No changes detected between the two schemas.
    #[error("no changes detected between schemas")]
    NoChanges,

    /// The on-disk chain is not a valid linear sequence.
    #[error("migration chain broken at position {position}: {message}")]
    ChainBroken {
        /// Chain position (1-based) where validation failed.
        position: usize,
        /// Description of the problem.
        message: String,
    },

    /// Marker or manifest is unreadable or inconsistent with the chain.
    #[error("migration state corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A step failed while being applied. Later steps were not attempted.
    #[error("step {step_id} (position {position}) failed: {source}")]
    ApplyFailed {
        /// Id of the failing step.
        step_id: String,
        /// Chain position (1-based) of the failing step.
        position: usize,
        /// The database error raised by the step.
        #[source]
        source: crate::error::Error,
        /// Per-step outcomes up to and including the failure.
        report: ApplyReport,
    },

    /// Database error outside step execution.
    #[error("database error: {0}")]
    Database(#[from] crate::error::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::ApplyFailed {
            step_id: "a1b2c3d4e5f6".to_string(),
            position: 2,
            source: crate::error::Error::Database("no such table: ports".to_string()),
            report: ApplyReport::default(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a1b2c3d4e5f6"));
        assert!(msg.contains("no such table: ports"));
    }
}
