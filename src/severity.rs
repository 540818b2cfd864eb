//! Severity levels for messages attached to build resources.

use crate::error::{BuildwireError, Result};

/// Severity of a diagnostic attached to a build resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Warning severity level.
    Warning,
    /// Error severity level.
    Error,
}

impl Severity {
    /// Legacy integer value used by older integrations.
    pub fn value(self) -> i32 {
        match self {
            Severity::Warning => 1,
            Severity::Error => 2,
        }
    }

    /// Converts a legacy integer severity value.
    ///
    /// An unknown value indicates a caller bug and fails loudly instead of
    /// being clamped to the nearest known level.
    pub fn from_value(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Severity::Warning),
            2 => Ok(Severity::Error),
            other => Err(BuildwireError::UnknownSeverity(other)),
        }
    }
}
