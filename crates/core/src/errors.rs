use thiserror::Error;

use crate::domain::session::SessionStatus;
use crate::lifecycle::rules::TransitionError;

/// Failures surfaced by engine operations. `StateConflict` is expected
/// under concurrency and callers treat it as "already handled elsewhere";
/// everything else maps onto the interface taxonomy below.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("session {session_id} is no longer active ({status:?})")]
    SessionNotActive { session_id: String, status: SessionStatus },
    #[error("session {session_id} was updated concurrently; re-read before retrying")]
    StateConflict { session_id: String },
    #[error("insufficient balance on {profile_id}: balance {balance}, delta {delta}")]
    InsufficientBalance { profile_id: String, balance: i64, delta: i64 },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// What the HTTP boundary shows. Internal detail stays in `message` for
/// logs; `user_message` is the only text relayed to the requester.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested session or quote does not exist.",
            Self::Conflict { .. } => {
                "This session is no longer active or was just updated by someone else."
            }
            Self::Unprocessable { .. } => "The account balance does not cover this operation.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl EngineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<EngineError> for InterfaceError {
    fn from(value: EngineError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            EngineError::Validation(message) => {
                Self::BadRequest { message, correlation_id: unassigned }
            }
            EngineError::NotFound { entity, id } => Self::NotFound {
                message: format!("{entity} {id} not found"),
                correlation_id: unassigned,
            },
            EngineError::SessionNotActive { .. }
            | EngineError::StateConflict { .. }
            | EngineError::Transition(_) => {
                Self::Conflict { message: value.to_string(), correlation_id: unassigned }
            }
            EngineError::InsufficientBalance { .. } => {
                Self::Unprocessable { message: value.to_string(), correlation_id: unassigned }
            }
            EngineError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::SessionStatus;
    use crate::errors::{EngineError, InterfaceError};
    use crate::lifecycle::rules::TransitionError;

    #[test]
    fn validation_maps_to_bad_request_with_correlation_id() {
        let interface = EngineError::Validation("flow_type is required".to_owned())
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn inactive_session_maps_to_conflict_with_user_safe_message() {
        let interface = EngineError::SessionNotActive {
            session_id: "S-1".to_owned(),
            status: SessionStatus::Timeout,
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "This session is no longer active or was just updated by someone else."
        );
    }

    #[test]
    fn lost_races_and_guard_failures_both_map_to_conflict() {
        let conflict =
            EngineError::StateConflict { session_id: "S-2".to_owned() }.into_interface("req-3");
        let guard = EngineError::Transition(TransitionError::ExtensionLimitReached {
            extensions_count: 2,
            max_extensions: 2,
        })
        .into_interface("req-4");

        assert!(matches!(conflict, InterfaceError::Conflict { .. }));
        assert!(matches!(guard, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn insufficient_balance_maps_to_unprocessable() {
        let interface = EngineError::InsufficientBalance {
            profile_id: "p-9".to_owned(),
            balance: 40,
            delta: -100,
        }
        .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
    }

    #[test]
    fn persistence_failure_maps_to_service_unavailable() {
        let interface = EngineError::Persistence("database lock timeout".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
