//! 🏗 Records, errors, and the request boundary of the ticket reservation engine
#![warn(missing_docs)]

mod config;
mod error;
mod event;
pub mod keys;
mod request;
mod ticket;

pub use config::{parse_duration, Config};
pub use error::{ErrorKind, TicketError, TicketResult};
pub use event::{
    channels, Notification, NotificationKind, PaymentIntent, PaymentSuccess, UserNotification,
};
pub use request::{Handoff, Request, RequestHandler, RequestKind, ReserveOutcome, Response};
pub use ticket::{Reservation, Ticket, TicketStatus, WaitingListItem};
