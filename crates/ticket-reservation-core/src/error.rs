//! Failure taxonomy shared by every ticket operation

use thiserror::Error;

/// Result of a ticket operation
pub type TicketResult<T> = Result<T, TicketError>;

/// Why a ticket operation failed
///
/// Clients decide whether to retry from the [`ErrorKind`]: only
/// [`TicketError::Conflict`] is worth retrying.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum TicketError {
    /// The ticket (or the caller's waiting-list entry) does not exist
    #[error("ticket {0} not found")]
    NotFound(String),
    /// The ticket has been sold
    #[error("ticket {0} has already been paid")]
    AlreadyPaid(String),
    /// Wrong status or wrong owner for the requested transition
    ///
    /// Both cases share this variant so a non-owner learns nothing about who
    /// holds the ticket.
    #[error("ticket {0} does not allow this operation")]
    InvalidState(String),
    /// Optimistic retry budget exhausted under contention
    #[error("ticket {0} is contended, try again")]
    Conflict(String),
    /// Store unreachable, undecodable record, or partial multi-key write
    #[error("internal error: {0}")]
    Internal(String),
}

/// Field-less mirror of [`TicketError`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// See [`TicketError::NotFound`]
    NotFound,
    /// See [`TicketError::AlreadyPaid`]
    AlreadyPaid,
    /// See [`TicketError::InvalidState`]
    InvalidState,
    /// See [`TicketError::Conflict`]
    Conflict,
    /// See [`TicketError::Internal`]
    Internal,
}

impl TicketError {
    /// The kind of failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            TicketError::NotFound(_) => ErrorKind::NotFound,
            TicketError::AlreadyPaid(_) => ErrorKind::AlreadyPaid,
            TicketError::InvalidState(_) => ErrorKind::InvalidState,
            TicketError::Conflict(_) => ErrorKind::Conflict,
            TicketError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same call may succeed if simply repeated
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        TicketError::Internal(format!("malformed record: {err}"))
    }
}
