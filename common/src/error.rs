//! Error taxonomy with stable category identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error category attached to every failing return value.
///
/// `Incorrect` and `Connection` are the two parent categories; the
/// remaining variants are their children. `Fault` is the uncategorized
/// catch-all.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unknown or uncategorized failure
    Fault,
    /// Caller-side problem (parent category)
    Incorrect,
    /// Operation not supported by this provider
    Unsupported,
    /// Referenced entity does not exist
    NotFound,
    /// Malformed or out-of-range parameters
    InvalidParams,
    /// Missing or rejected credentials
    Unauthorized,
    /// Transport-side problem (parent category)
    Connection,
    /// Deadline elapsed
    Timeout,
    /// Remote endpoint unreachable
    Unavailable,
    /// Remote endpoint refusing load
    Busy,
    /// Request budget exhausted
    RateLimited,
    /// Local state behind the remote source of truth
    Outdated,
}

impl ErrorCategory {
    /// Whether this category is `Incorrect` or one of its children.
    #[must_use]
    pub const fn is_incorrect(self) -> bool {
        matches!(
            self,
            Self::Incorrect
                | Self::Unsupported
                | Self::NotFound
                | Self::InvalidParams
                | Self::Unauthorized
        )
    }

    /// Whether this category is `Connection` or one of its children.
    #[must_use]
    pub const fn is_connection(self) -> bool {
        matches!(
            self,
            Self::Connection
                | Self::Timeout
                | Self::Unavailable
                | Self::Busy
                | Self::RateLimited
                | Self::Outdated
        )
    }

    /// Alias used by some venue documentation; maps to `Unauthorized`.
    #[must_use]
    pub const fn forbidden() -> Self {
        Self::Unauthorized
    }

    /// Alias used by some venue documentation; maps to `Fault`.
    #[must_use]
    pub const fn interrupted() -> Self {
        Self::Fault
    }

    /// Stable snake_case identifier for this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fault => "fault",
            Self::Incorrect => "incorrect",
            Self::Unsupported => "unsupported",
            Self::NotFound => "not_found",
            Self::InvalidParams => "invalid_params",
            Self::Unauthorized => "unauthorized",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Busy => "busy",
            Self::RateLimited => "rate_limited",
            Self::Outdated => "outdated",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value-typed error carried by fallible core operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{category}: {message}")]
pub struct CoreError {
    /// Stable category for programmatic handling
    pub category: ErrorCategory,
    /// Human-readable context
    pub message: String,
}

impl CoreError {
    /// Create an error with an explicit category.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Uncategorized failure.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Fault, message)
    }

    /// Referenced entity does not exist.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// Malformed or out-of-range parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidParams, message)
    }

    /// Operation not supported by this provider.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unsupported, message)
    }

    /// Deadline elapsed.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Remote endpoint unreachable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unavailable, message)
    }
}
