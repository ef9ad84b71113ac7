//! Ticket, reservation and waiting-list records as they are persisted

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Ticket`]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Nobody holds the ticket
    #[default]
    Available,
    /// Held by one user until `expires_at`
    Reserved,
    /// Sold; terminal
    Paid,
}

/// A uniquely identified, non-divisible reservable resource
///
/// `reserved_by` and `reserved_at` are set iff the status is not
/// [`TicketStatus::Available`], `expires_at` is set iff the status is
/// [`TicketStatus::Reserved`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Ticket {
    /// Globally unique ticket id
    pub id: String,
    /// Current state
    #[serde(default)]
    pub status: TicketStatus,
    /// Holder of the reservation (or buyer once paid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<String>,
    /// When the current holder obtained the ticket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the current reservation lapses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create an available ticket
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TicketStatus::Available,
            reserved_by: None,
            reserved_at: None,
            expires_at: None,
        }
    }

    /// The same ticket, reserved by `user_id` from `now` for `ttl`
    pub fn reserved_for(&self, user_id: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: self.id.clone(),
            status: TicketStatus::Reserved,
            reserved_by: Some(user_id.to_owned()),
            reserved_at: Some(now),
            expires_at: Some(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)),
        }
    }

    /// The same ticket, sold to its current holder
    pub fn paid(&self) -> Self {
        Self {
            status: TicketStatus::Paid,
            expires_at: None,
            ..self.clone()
        }
    }

    /// The same ticket with every hold cleared
    pub fn released(&self) -> Self {
        Self::new(self.id.clone())
    }

    /// Whether `user_id` holds the reservation, lapsed or not
    #[inline]
    pub fn is_reserved_by(&self, user_id: &str) -> bool {
        self.status == TicketStatus::Reserved && self.reserved_by.as_deref() == Some(user_id)
    }

    /// Whether the reservation window has passed at `now`
    #[inline]
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Reserved && self.expires_at.map_or(true, |at| at <= now)
    }
}

/// Active, TTL-bound claim on one ticket, keyed by ticket id
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Reservation {
    /// The reserved ticket
    pub ticket_id: String,
    /// The holder
    pub user_id: String,
    /// Start of the hold
    pub created_at: DateTime<Utc>,
    /// End of the hold
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Reservation record mirroring a reserved [`Ticket`]
    ///
    /// Returns [`None`] if the ticket is not reserved.
    pub fn of(ticket: &Ticket) -> Option<Self> {
        if ticket.status != TicketStatus::Reserved {
            return None;
        }
        Some(Self {
            ticket_id: ticket.id.clone(),
            user_id: ticket.reserved_by.clone()?,
            created_at: ticket.reserved_at?,
            expires_at: ticket.expires_at?,
        })
    }
}

/// One user queued behind an active reservation
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WaitingListItem {
    /// The contested ticket
    pub ticket_id: String,
    /// The waiting user
    pub user_id: String,
    /// Arrival time
    pub added_at: DateTime<Utc>,
    /// 1-based index in the queue at read time, never persisted
    #[serde(skip)]
    pub position: usize,
}

impl WaitingListItem {
    /// A fresh entry without a position
    pub fn new(ticket_id: impl Into<String>, user_id: impl Into<String>, added_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            user_id: user_id.into(),
            added_at,
            position: 0,
        }
    }
}
