use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// The subject of a query does not exist.
    NotFound(Ulid),
    ResourceNotFound(Ulid),
    AssigneeNotFound(Ulid),
    InvalidInterval {
        valid_from: Ms,
        valid_until: Ms,
    },
    Conflict {
        resource_id: Ulid,
        existing: Ulid,
    },
    LimitExceeded(&'static str),
    Cancelled,
    WalError(String),
}

/// Coarse failure class, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    Cancelled,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::ResourceNotFound(_)
            | EngineError::AssigneeNotFound(_)
            | EngineError::InvalidInterval { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::BadRequest,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::AssigneeNotFound(id) => write!(f, "assignee not found: {id}"),
            EngineError::InvalidInterval {
                valid_from,
                valid_until,
            } => write!(
                f,
                "invalid interval: valid_until {valid_until} is before valid_from {valid_from}"
            ),
            EngineError::Conflict {
                resource_id,
                existing,
            } => write!(
                f,
                "overlapping assignment exists for this resource: {resource_id} (assignment {existing})"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Cancelled => write!(f, "operation cancelled before commit"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
