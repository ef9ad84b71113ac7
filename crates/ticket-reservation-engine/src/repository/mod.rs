//! Storage adapters over the [`Store`](crate::store::Store)
//!
//! Repositories encode and decode records and queue writes into a CAS
//! [`Batch`](crate::store::Batch). They never decide on a transition.

mod payment;
mod reservation;
mod ticket;
mod waiting_list;

pub use payment::{PaymentIntentRepository, PaymentStatus};
pub use reservation::ReservationRepository;
pub use ticket::TicketRepository;
pub use waiting_list::WaitingListRepository;
