//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel subject key for records whose subject cannot be resolved.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Errors raised by the pure analytics functions.
///
/// Each variant carries the offending value so callers can render a message
/// without re-deriving context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    /// A time frame symbol other than `daily`, `weekly` or `monthly`.
    #[error("invalid time frame: {value:?} (expected daily, weekly or monthly)")]
    InvalidTimeFrame { value: String },

    /// A usage record with a negative duration.
    #[error("invalid duration {duration_seconds}s for subject {subject_key}")]
    InvalidDuration {
        subject_key: String,
        duration_seconds: i64,
    },
}

/// How the backend categorized a record's subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductivityCategory {
    Productive,
    Distracting,
    Neutral,
}

impl ProductivityCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Productive => "productive",
            Self::Distracting => "distracting",
            Self::Neutral => "neutral",
        }
    }

    /// Lenient parse of backend category strings.
    ///
    /// Anything that is not recognisably productive or distracting is neutral.
    pub fn from_backend(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "productive" | "focus" | "focused" => Self::Productive,
            "distracting" | "distraction" | "distracted" | "unproductive" => Self::Distracting,
            _ => Self::Neutral,
        }
    }
}

impl fmt::Display for ProductivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// The grouping identity of a usage record: a domain or an application name.
    SubjectKey, "subject key"
);

define_string_id!(
    /// A stable identifier for an alertable item (e.g. a todo's `_id`).
    ItemId, "item ID"
);

impl SubjectKey {
    /// The `"unknown"` sentinel.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_SUBJECT.to_string())
    }

    /// Builds a key from untrusted input, falling back to `"unknown"`.
    ///
    /// Surrounding whitespace is trimmed; blank input becomes the sentinel.
    pub fn or_unknown(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(Self::unknown, |s| Self(s.to_string()))
    }

    /// Returns true for the `"unknown"` sentinel.
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_SUBJECT
    }
}
