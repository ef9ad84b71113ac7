//! Events published on the store's pub/sub channels

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Names of the pub/sub channels
pub mod channels {
    /// Payment intents, consumed by the payment worker
    pub const PAYMENT_EVENTS: &str = "payment_events";
    /// Settled payments, for external consumers
    pub const PAYMENT_SUCCESS: &str = "payment_success";
    /// Per-user notifications, relayed to connected clients
    pub const NOTIFICATION_EVENTS: &str = "notification_events";
    /// Keyspace notifications for keys removed by their TTL
    pub const EXPIRED_KEYS: &str = "__keyevent@0__:expired";
}

/// Kind of a [`Notification`]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The recipient was promoted from the waiting list
    TicketAvailable,
    /// The recipient's reservation lapsed
    ReservationExpired,
    /// The recipient's payment settled
    PaymentSuccess,
}

/// Transient, best-effort message for one user
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Notification {
    /// What happened
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Human readable text
    pub message: String,
    /// Free-form details
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Notification {
    fn about(kind: NotificationKind, message: &str, ticket_id: &str, user_id: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert("ticket_id".to_owned(), ticket_id.to_owned());
        data.insert("user_id".to_owned(), user_id.to_owned());
        Self {
            kind,
            message: message.to_owned(),
            data,
        }
    }

    /// `user_id` now holds `ticket_id` after waiting for it
    pub fn ticket_available(ticket_id: &str, user_id: &str) -> Self {
        Self::about(
            NotificationKind::TicketAvailable,
            "A ticket you were waiting for is now reserved for you",
            ticket_id,
            user_id,
        )
    }

    /// The reservation of `user_id` on `ticket_id` ran out
    pub fn reservation_expired(ticket_id: &str, user_id: &str) -> Self {
        Self::about(
            NotificationKind::ReservationExpired,
            "Your ticket reservation has expired",
            ticket_id,
            user_id,
        )
    }

    /// Payment of `user_id` for `ticket_id` went through
    pub fn payment_success(ticket_id: &str, user_id: &str, timestamp: DateTime<Utc>) -> Self {
        let mut notification = Self::about(
            NotificationKind::PaymentSuccess,
            "Your payment was successful",
            ticket_id,
            user_id,
        );
        notification
            .data
            .insert("timestamp".to_owned(), timestamp.to_rfc3339());
        notification
    }

    /// Value of a `data` entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// A [`Notification`] together with its recipient, as sent over
/// [`channels::NOTIFICATION_EVENTS`]
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct UserNotification {
    /// Recipient
    pub user_id: String,
    /// Payload
    pub notification: Notification,
}

/// Request to settle payment for a reserved ticket
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// The ticket being bought
    pub ticket_id: String,
    /// The buyer
    pub user_id: String,
    /// When `Pay` committed
    pub timestamp: DateTime<Utc>,
}

/// Settlement confirmation
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PaymentSuccess {
    /// The ticket that was bought
    pub ticket_id: String,
    /// The buyer
    pub user_id: String,
    /// When settlement completed
    pub timestamp: DateTime<Utc>,
}
