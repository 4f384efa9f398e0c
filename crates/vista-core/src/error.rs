use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
/// Structured runtime error with a stable internal classification.
/// Not a stable API; intended for internal use and may change without notice.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// A mutating call reached the read-only projection surface.
    pub fn read_only(op: &str) -> Self {
        Self::new(
            ErrorClass::ReadOnly,
            ErrorOrigin::View,
            format!("projection is read-only: {op} must be applied to the source"),
        )
    }

    pub fn destroyed(op: &str) -> Self {
        Self::new(
            ErrorClass::Destroyed,
            ErrorOrigin::View,
            format!("view is destroyed: {op} rejected"),
        )
    }

    pub fn missing_source(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::MissingSource, ErrorOrigin::Source, message)
    }

    pub fn bad_source(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::BadSource, ErrorOrigin::Source, message)
    }

    pub fn missing_id_property(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::MissingIdProperty, ErrorOrigin::View, message)
    }

    pub fn strategy_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Strategy,
            message,
        )
    }

    pub fn serialize_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Serialize, message)
    }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        matches!(self.class, ErrorClass::Destroyed)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    ReadOnly,
    MissingSource,
    BadSource,
    MissingIdProperty,
    Destroyed,
    Internal,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ReadOnly => "read_only",
            Self::MissingSource => "missing_source",
            Self::BadSource => "bad_source",
            Self::MissingIdProperty => "missing_id_property",
            Self::Destroyed => "destroyed",
            Self::Internal => "internal",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Source,
    View,
    Strategy,
    Filter,
    Session,
    Serialize,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Source => "source",
            Self::View => "view",
            Self::Strategy => "strategy",
            Self::Filter => "filter",
            Self::Session => "session",
            Self::Serialize => "serialize",
        };
        write!(f, "{label}")
    }
}
