use std::sync::Arc;
use std::time::Duration;

use ticket_reservation_core::{keys, Reservation, TicketResult};
use tracing::warn;

use crate::store::{Batch, Store};

/// Active reservations under `reservation:<ticket id>`, each living for the
/// hold window
///
/// The disappearance of a record is the expiry event.
#[derive(Clone)]
pub struct ReservationRepository {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl ReservationRepository {
    /// Create a new [`ReservationRepository`] whose records live for `ttl`
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The active reservation on a ticket
    pub fn get_by_ticket(&self, ticket_id: &str) -> TicketResult<Option<Reservation>> {
        match self.store.get(&keys::reservation(ticket_id))? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Whether a ticket has an unexpired reservation record
    pub fn is_active(&self, ticket_id: &str) -> TicketResult<bool> {
        Ok(self.store.exists(&keys::reservation(ticket_id))?)
    }

    /// Every active reservation held by `user_id`
    pub fn get_by_user(&self, user_id: &str) -> TicketResult<Vec<Reservation>> {
        let mut reservations = Vec::new();
        for key in self.store.scan_prefix(keys::RESERVATION_PREFIX)? {
            let Some(data) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<Reservation>(&data) {
                Ok(reservation) if reservation.user_id == user_id => reservations.push(reservation),
                Ok(_) => {}
                Err(err) => warn!(key = %key, %err, "skipping undecodable reservation record"),
            }
        }
        Ok(reservations)
    }

    /// Queue a write of `reservation` with the hold window as TTL
    pub fn stage_reserve(&self, batch: &mut Batch, reservation: &Reservation) -> TicketResult<()> {
        batch.set(
            keys::reservation(&reservation.ticket_id),
            serde_json::to_string(reservation)?,
            Some(self.ttl),
        );
        Ok(())
    }

    /// Queue the removal of a ticket's reservation
    pub fn stage_cancel(&self, batch: &mut Batch, ticket_id: &str) {
        batch.del(keys::reservation(ticket_id));
    }
}
