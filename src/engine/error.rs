use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::TimeSlot;

/// Coarse classification every error reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// SQLSTATE reported to Postgres clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "P0002",
            ErrorKind::Forbidden => "42501",
            ErrorKind::Conflict => "23P01",
            ErrorKind::InvalidInput => "22023",
            ErrorKind::Internal => "XX000",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    /// Never names the reservation it collided with.
    #[error("slot {slot} on {date} overlaps an existing reservation")]
    Conflict { date: NaiveDate, slot: TimeSlot },
    #[error("cannot change {field} from {from} to {to}")]
    InvalidTransition {
        field: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::Conflict { .. } | EngineError::InvalidTransition { .. } => {
                ErrorKind::Conflict
            }
            EngineError::InvalidInput { .. } | EngineError::LimitExceeded(_) => {
                ErrorKind::InvalidInput
            }
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn conflict_message_names_slot_not_reservation() {
        let err = EngineError::Conflict {
            date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            slot: TimeSlot::new(
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            ),
        };
        assert_eq!(
            err.to_string(),
            "slot [09:30, 10:30) on 2025-05-01 overlaps an existing reservation"
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.kind().sqlstate(), "23P01");
    }

    #[test]
    fn kinds() {
        assert_eq!(
            EngineError::InvalidTransition {
                field: "status",
                from: "completed",
                to: "cancelled",
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(EngineError::LimitExceeded("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(EngineError::Forbidden("x").kind().sqlstate(), "42501");
        assert_eq!(EngineError::WalError("disk".into()).kind(), ErrorKind::Internal);
    }
}
