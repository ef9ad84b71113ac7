use std::sync::Arc;

use ticket_reservation_core::{keys, Ticket, TicketError, TicketResult};
use tracing::warn;

use crate::store::{Batch, Store};

/// Ticket records under `ticket:<id>`
#[derive(Clone)]
pub struct TicketRepository {
    store: Arc<dyn Store>,
}

impl TicketRepository {
    /// Create a new [`TicketRepository`]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a new ticket
    ///
    /// Fails with [`TicketError::InvalidState`] if the id is taken.
    pub fn create(&self, ticket: &Ticket) -> TicketResult<()> {
        let data = serde_json::to_string(ticket)?;
        if !self.store.set_nx(&keys::ticket(&ticket.id), &data)? {
            return Err(TicketError::InvalidState(ticket.id.clone()));
        }
        Ok(())
    }

    /// Read a ticket
    pub fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        match self.store.get(&keys::ticket(id))? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Every ticket in store order
    ///
    /// Records that cannot be decoded are skipped.
    pub fn list(&self) -> TicketResult<Vec<Ticket>> {
        let keys = self.store.scan_prefix(keys::TICKET_PREFIX)?;
        let mut tickets = Vec::with_capacity(keys.len());
        for key in keys {
            // the ticket may vanish between scan and read
            let Some(data) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_str(&data) {
                Ok(ticket) => tickets.push(ticket),
                Err(err) => warn!(key = %key, %err, "skipping undecodable ticket record"),
            }
        }
        Ok(tickets)
    }

    /// Queue an overwrite of `ticket`
    pub fn stage_put(&self, batch: &mut Batch, ticket: &Ticket) -> TicketResult<()> {
        batch.set(keys::ticket(&ticket.id), serde_json::to_string(ticket)?, None);
        Ok(())
    }
}
