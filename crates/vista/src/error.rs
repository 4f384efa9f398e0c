use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use vista_core::error::{
    ErrorClass as CoreErrorClass, ErrorOrigin as CoreErrorOrigin, InternalError,
};

///
/// Error
/// Public error type with a stable class + origin taxonomy.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    #[must_use]
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self.class, ErrorClass::ReadOnly)
    }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        matches!(self.class, ErrorClass::Destroyed)
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        Self {
            class: err.class.into(),
            origin: err.origin.into(),
            message: err.message,
        }
    }
}

///
/// ErrorClass
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorClass {
    #[display("read_only")]
    ReadOnly,
    #[display("missing_source")]
    MissingSource,
    #[display("bad_source")]
    BadSource,
    #[display("missing_id_property")]
    MissingIdProperty,
    #[display("destroyed")]
    Destroyed,
    #[display("internal")]
    Internal,
}

impl From<CoreErrorClass> for ErrorClass {
    fn from(class: CoreErrorClass) -> Self {
        match class {
            CoreErrorClass::ReadOnly => Self::ReadOnly,
            CoreErrorClass::MissingSource => Self::MissingSource,
            CoreErrorClass::BadSource => Self::BadSource,
            CoreErrorClass::MissingIdProperty => Self::MissingIdProperty,
            CoreErrorClass::Destroyed => Self::Destroyed,
            CoreErrorClass::Internal | CoreErrorClass::InvariantViolation => Self::Internal,
        }
    }
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    #[display("source")]
    Source,
    #[display("view")]
    View,
    #[display("strategy")]
    Strategy,
    #[display("filter")]
    Filter,
    #[display("session")]
    Session,
    #[display("serialize")]
    Serialize,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Source => Self::Source,
            CoreErrorOrigin::View => Self::View,
            CoreErrorOrigin::Strategy => Self::Strategy,
            CoreErrorOrigin::Filter => Self::Filter,
            CoreErrorOrigin::Session => Self::Session,
            CoreErrorOrigin::Serialize => Self::Serialize,
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_map_to_the_public_taxonomy() {
        let err: Error = InternalError::read_only("assign").into();
        assert!(err.is_read_only());
        assert_eq!(err.origin, ErrorOrigin::View);
        assert!(err.message.contains("assign"));
    }

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(ErrorClass::MissingIdProperty.to_string(), "missing_id_property");
        assert_eq!(ErrorOrigin::Serialize.to_string(), "serialize");
    }
}
