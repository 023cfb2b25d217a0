//! Classification of transport failures into retry decisions

use crate::error::RemoteEvalError;
use crate::types::FailureErrorType;

/// Marker the transport puts in errors when nothing serves the subject
pub const NO_SUBSCRIBERS_MARKER: &str = "no subscribers listening";

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection and network hiccups. Worth another attempt.
    Transient,
    /// The evaluator process is not running. Fail fast.
    ServiceDown,
    /// Anything else. Not retried.
    Other,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    /// Error type reported in the fail-closed response
    pub fn failure_type(&self) -> FailureErrorType {
        match self {
            ErrorClass::ServiceDown => FailureErrorType::NoSubscribers,
            ErrorClass::Transient | ErrorClass::Other => FailureErrorType::ServiceError,
        }
    }
}

/// Classify a typed error, falling back to its message for opaque variants
pub fn classify(error: &RemoteEvalError) -> ErrorClass {
    match error {
        RemoteEvalError::Timeout(_)
        | RemoteEvalError::Connection(_)
        | RemoteEvalError::Network(_)
        | RemoteEvalError::NotConnected => ErrorClass::Transient,
        RemoteEvalError::NoSubscribers(_) => ErrorClass::ServiceDown,
        RemoteEvalError::Service(message) => classify_message(message),
        RemoteEvalError::Serialization(_)
        | RemoteEvalError::Configuration(_)
        | RemoteEvalError::Metrics(_) => ErrorClass::Other,
    }
}

/// Classify a raw failure message
pub fn classify_message(message: &str) -> ErrorClass {
    if message.contains(NO_SUBSCRIBERS_MARKER) {
        return ErrorClass::ServiceDown;
    }

    let message = message.to_lowercase();
    if message.contains("timeout") || message.contains("timed out") {
        return ErrorClass::Transient;
    }
    if message.contains("connection") || message.contains("network") {
        return ErrorClass::Transient;
    }

    ErrorClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_typed_errors() {
        assert_eq!(classify(&RemoteEvalError::Timeout(3000)), ErrorClass::Transient);
        assert_eq!(
            classify(&RemoteEvalError::Connection("reset by peer".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&RemoteEvalError::NotConnected), ErrorClass::Transient);
        assert_eq!(
            classify(&RemoteEvalError::NoSubscribers("auth.evaluate".into())),
            ErrorClass::ServiceDown
        );
        assert_eq!(
            classify(&RemoteEvalError::Serialization("bad json".into())),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_opaque_service_messages() {
        assert_eq!(classify_message("Timeout has occurred"), ErrorClass::Transient);
        assert_eq!(classify_message("request TIMED OUT"), ErrorClass::Transient);
        assert_eq!(classify_message("Connection refused"), ErrorClass::Transient);
        assert_eq!(classify_message("network unreachable"), ErrorClass::Transient);
        assert_eq!(
            classify_message("no subscribers listening to \"auth.evaluate\""),
            ErrorClass::ServiceDown
        );
        assert_eq!(classify_message("policy not found"), ErrorClass::Other);
        assert_eq!(classify_message(""), ErrorClass::Other);
    }

    #[test]
    fn test_failure_type_mapping() {
        assert_eq!(ErrorClass::ServiceDown.failure_type(), FailureErrorType::NoSubscribers);
        assert_eq!(ErrorClass::Transient.failure_type(), FailureErrorType::ServiceError);
        assert_eq!(ErrorClass::Other.failure_type(), FailureErrorType::ServiceError);
    }

    proptest! {
        #[test]
        fn prop_no_subscribers_never_retried(prefix in ".{0,20}", suffix in ".{0,20}") {
            let message = format!("{}{}{}", prefix, NO_SUBSCRIBERS_MARKER, suffix);
            prop_assert_eq!(classify_message(&message), ErrorClass::ServiceDown);
            prop_assert!(!classify_message(&message).is_retryable());
        }

        #[test]
        fn prop_unknown_messages_not_retried(message in "[a-z ]{0,40}") {
            prop_assume!(!message.contains("timeout"));
            prop_assume!(!message.contains("timed out"));
            prop_assume!(!message.contains("connection"));
            prop_assume!(!message.contains("network"));
            prop_assume!(!message.contains(NO_SUBSCRIBERS_MARKER));
            prop_assert_eq!(classify_message(&message), ErrorClass::Other);
        }
    }
}
