use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ticket_reservation_core::{keys, PaymentIntent, TicketError, TicketResult};
use tracing::warn;

use crate::store::{Batch, Store};

const USER_ID: &str = "user_id";
const TIMESTAMP: &str = "timestamp";
const STATUS: &str = "status";

/// Settlement state of a recorded payment intent
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PaymentStatus {
    /// Recorded by `Pay`, not settled yet
    Pending,
    /// Settled and logged
    Settled,
}

impl PaymentStatus {
    fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Settled => "settled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "settled" => Some(PaymentStatus::Settled),
            _ => None,
        }
    }
}

/// Durable payment intents under `payment:<ticket id>`, plus the
/// `payments:pending` index of unsettled ones
///
/// This is what lets the payment worker resume after a crash between
/// `Pay` committing and settlement being logged.
#[derive(Clone)]
pub struct PaymentIntentRepository {
    store: Arc<dyn Store>,
}

impl PaymentIntentRepository {
    /// Create a new [`PaymentIntentRepository`]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Queue the recording of a pending intent
    pub fn stage_intent(&self, batch: &mut Batch, intent: &PaymentIntent) {
        let key = keys::payment(&intent.ticket_id);
        batch
            .hset(&key, USER_ID, &intent.user_id)
            .hset(&key, TIMESTAMP, intent.timestamp.to_rfc3339())
            .hset(&key, STATUS, PaymentStatus::Pending.as_str())
            .sadd(keys::PENDING_PAYMENTS, &intent.ticket_id);
    }

    /// The intent recorded for a ticket and its status
    pub fn get(&self, ticket_id: &str) -> TicketResult<Option<(PaymentIntent, PaymentStatus)>> {
        let fields = self.store.hgetall(&keys::payment(ticket_id))?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode(ticket_id, &fields).map(Some)
    }

    /// Settlement state of a ticket's payment, [`None`] if none was recorded
    pub fn status(&self, ticket_id: &str) -> TicketResult<Option<PaymentStatus>> {
        Ok(self
            .store
            .hget(&keys::payment(ticket_id), STATUS)?
            .and_then(|s| PaymentStatus::parse(&s)))
    }

    /// Every intent that still awaits settlement
    pub fn pending(&self) -> TicketResult<Vec<PaymentIntent>> {
        let mut intents = Vec::new();
        for ticket_id in self.store.smembers(keys::PENDING_PAYMENTS)? {
            match self.get(&ticket_id) {
                Ok(Some((intent, PaymentStatus::Pending))) => intents.push(intent),
                Ok(_) => {}
                Err(err) => warn!(ticket_id = %ticket_id, %err, "skipping undecodable payment intent"),
            }
        }
        Ok(intents)
    }

    /// Record a settlement and drop the intent from the pending index
    pub fn mark_settled(&self, intent: &PaymentIntent) -> TicketResult<()> {
        let key = keys::payment(&intent.ticket_id);
        let mut batch = Batch::new();
        batch
            .hset(&key, USER_ID, &intent.user_id)
            .hset(&key, TIMESTAMP, intent.timestamp.to_rfc3339())
            .hset(&key, STATUS, PaymentStatus::Settled.as_str())
            .srem(keys::PENDING_PAYMENTS, &intent.ticket_id);
        // nothing is watched, so the commit cannot lose a race
        let watch = self.store.watch(&[])?;
        self.store.exec(&watch, batch)?;
        Ok(())
    }

    /// Next number for the transaction log
    pub fn next_sequence(&self) -> TicketResult<u64> {
        let seq = self.store.incr(keys::PAYMENT_SEQUENCE)?;
        Ok(seq.max(0) as u64)
    }
}

fn decode(
    ticket_id: &str,
    fields: &HashMap<String, String>,
) -> TicketResult<(PaymentIntent, PaymentStatus)> {
    let malformed = || TicketError::Internal(format!("malformed payment intent for {ticket_id}"));
    let user_id = fields.get(USER_ID).ok_or_else(malformed)?;
    let timestamp = fields
        .get(TIMESTAMP)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .ok_or_else(malformed)?
        .with_timezone(&Utc);
    let status = fields
        .get(STATUS)
        .and_then(|s| PaymentStatus::parse(s))
        .ok_or_else(malformed)?;
    let intent = PaymentIntent {
        ticket_id: ticket_id.to_owned(),
        user_id: user_id.clone(),
        timestamp,
    };
    Ok((intent, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn settling_clears_the_pending_index() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let payments = PaymentIntentRepository::new(store.clone());
        let intent = PaymentIntent {
            ticket_id: "T1".into(),
            user_id: "alice".into(),
            timestamp: Utc::now(),
        };

        let mut batch = Batch::new();
        payments.stage_intent(&mut batch, &intent);
        assert!(store.exec(&store.watch(&[]).unwrap(), batch).unwrap());
        assert_eq!(payments.status("T1").unwrap(), Some(PaymentStatus::Pending));
        assert_eq!(payments.pending().unwrap(), [intent.clone()]);

        payments.mark_settled(&intent).unwrap();
        assert_eq!(payments.status("T1").unwrap(), Some(PaymentStatus::Settled));
        assert!(payments.pending().unwrap().is_empty());
        assert!(!store.sismember(keys::PENDING_PAYMENTS, "T1").unwrap());
        let (stored, _) = payments.get("T1").unwrap().unwrap();
        assert_eq!(stored.user_id, "alice");
    }
}
