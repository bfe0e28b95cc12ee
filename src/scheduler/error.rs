//! Error types for the scheduler module

use std::fmt;
use std::path::Path;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Comment count did not grow between two crawls, the interval cannot be derived
    ZeroDelta {
        previous_count: u64,
        current_count: u64,
    },

    /// An empty job set was passed where the caller requires at least one job
    NoJobs,

    /// Configuration value out of range
    InvalidConfig {
        field: String,
        reason: String,
    },

    /// Time of day outside its natural range
    InvalidTime {
        hour: u32,
        minute: u32,
        second: u32,
    },

    /// Schedule store or snapshot could not be written or read
    Persistence {
        operation: String,
        path: String,
        reason: String,
    },

    /// A job could not be registered with the runtime
    Registration {
        job_id: String,
        reason: String,
    },

    /// No registration exists for the job id
    JobNotFound {
        job_id: String,
    },

    /// Serialization/deserialization error
    SerializationError {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDelta {
                previous_count,
                current_count,
            } => {
                write!(
                    f,
                    "Comment count delta must be positive (previous {}, current {})",
                    previous_count, current_count
                )
            }
            Self::NoJobs => write!(f, "Job set is empty"),
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid scheduler config '{}': {}", field, reason)
            }
            Self::InvalidTime {
                hour,
                minute,
                second,
            } => {
                write!(
                    f,
                    "Invalid time of day {:02}:{:02}:{:02}",
                    hour, minute, second
                )
            }
            Self::Persistence {
                operation,
                path,
                reason,
            } => {
                write!(f, "Persistence error during '{}' on {}: {}", operation, path, reason)
            }
            Self::Registration { job_id, reason } => {
                write!(f, "Failed to register job '{}': {}", job_id, reason)
            }
            Self::JobNotFound { job_id } => write!(f, "Job not registered: {}", job_id),
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create a zero/negative delta error
    pub fn zero_delta(previous_count: u64, current_count: u64) -> Self {
        Self::ZeroDelta {
            previous_count,
            current_count,
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error with the offending path
    pub fn persistence(
        operation: impl Into<String>,
        path: &Path,
        reason: impl fmt::Display,
    ) -> Self {
        Self::Persistence {
            operation: operation.into(),
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a registration error
    pub fn registration(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a configuration fault the caller should absorb
    /// by falling back to a safe default
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            Self::ZeroDelta { .. } | Self::NoJobs | Self::InvalidConfig { .. }
        )
    }

    /// Check if the error is recoverable
    ///
    /// Persistence and registration failures are retried on the next
    /// natural cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. } | Self::Registration { .. }
        )
    }
}
