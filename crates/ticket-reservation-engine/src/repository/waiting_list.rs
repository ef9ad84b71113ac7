use std::sync::Arc;

use ticket_reservation_core::{keys, TicketResult, WaitingListItem};
use tracing::warn;

use crate::store::{Batch, Store};

/// Per-ticket FIFO of waiting users under `waiting:<ticket id>`
///
/// Positions are computed from list order on every read. The same user may
/// appear several times.
#[derive(Clone)]
pub struct WaitingListRepository {
    store: Arc<dyn Store>,
}

impl WaitingListRepository {
    /// Create a new [`WaitingListRepository`]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Queue an append of `item` at the tail
    pub fn stage_add(&self, batch: &mut Batch, item: &WaitingListItem) -> TicketResult<()> {
        batch.rpush(keys::waiting(&item.ticket_id), serde_json::to_string(item)?);
        Ok(())
    }

    /// Queue the removal of the head
    pub fn stage_pop_head(&self, batch: &mut Batch, ticket_id: &str) {
        batch.lpop(keys::waiting(ticket_id));
    }

    /// The queue with 1-based positions
    pub fn get_by_ticket(&self, ticket_id: &str) -> TicketResult<Vec<WaitingListItem>> {
        let key = keys::waiting(ticket_id);
        let raw = self.store.lrange(&key, 0, -1)?;
        Ok(decode_all(&key, &raw))
    }

    /// The longest-waiting entry
    pub fn head(&self, ticket_id: &str) -> TicketResult<Option<WaitingListItem>> {
        let raw = self.store.lrange(&keys::waiting(ticket_id), 0, 0)?;
        match raw.first() {
            Some(data) => {
                let mut item: WaitingListItem = serde_json::from_str(data)?;
                item.position = 1;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Position of the first entry of `user_id`
    pub fn get_position(&self, ticket_id: &str, user_id: &str) -> TicketResult<Option<usize>> {
        Ok(self
            .get_by_ticket(ticket_id)?
            .into_iter()
            .find(|item| item.user_id == user_id)
            .map(|item| item.position))
    }

    /// Position of the entry equal to `entry`, searching from the tail
    pub fn position_of(&self, entry: &WaitingListItem) -> TicketResult<Option<usize>> {
        Ok(self
            .get_by_ticket(&entry.ticket_id)?
            .into_iter()
            .rev()
            .find(|item| item.user_id == entry.user_id && item.added_at == entry.added_at)
            .map(|item| item.position))
    }

    /// Every entry of `user_id` across all tickets
    pub fn get_by_user(&self, user_id: &str) -> TicketResult<Vec<WaitingListItem>> {
        let mut entries = Vec::new();
        for key in self.store.scan_prefix(keys::WAITING_PREFIX)? {
            let raw = self.store.lrange(&key, 0, -1)?;
            entries.extend(
                decode_all(&key, &raw)
                    .into_iter()
                    .filter(|item| item.user_id == user_id),
            );
        }
        Ok(entries)
    }

    /// Remove the first entry of `user_id`; returns whether one was found
    pub fn remove(&self, ticket_id: &str, user_id: &str) -> TicketResult<bool> {
        let key = keys::waiting(ticket_id);
        for data in self.store.lrange(&key, 0, -1)? {
            let Ok(item) = serde_json::from_str::<WaitingListItem>(&data) else {
                continue;
            };
            if item.user_id == user_id {
                // the exact encoded entry, so a concurrent pop cannot make us drop a neighbour
                return Ok(self.store.lrem(&key, 1, &data)? == 1);
            }
        }
        Ok(false)
    }
}

fn decode_all(key: &str, raw: &[String]) -> Vec<WaitingListItem> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, data)| match serde_json::from_str::<WaitingListItem>(data) {
            Ok(mut item) => {
                item.position = index + 1;
                Some(item)
            }
            Err(err) => {
                warn!(key, %err, "skipping undecodable waiting-list entry");
                None
            }
        })
        .collect()
}
