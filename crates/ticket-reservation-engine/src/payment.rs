//! Settlement of payment intents
//!
//! The worker consumes [`channels::PAYMENT_EVENTS`], settles against the
//! (simulated) gateway, appends to the [`TransactionLog`], and announces the
//! result. Intents are recorded durably by `Pay`, so processing is
//! idempotent and resumes from the pending index after a restart. A crash
//! between the log append and marking the intent settled can still repeat
//! the log line on recovery; readers deduplicate on the ticket id.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::Receiver;
use crossbeam::select;
use thiserror::Error;
use ticket_reservation_core::{
    channels, Notification, PaymentIntent, PaymentSuccess, TicketError,
};
use tracing::{debug, error, info, warn};

use crate::notification::Notifier;
use crate::repository::{PaymentIntentRepository, PaymentStatus};
use crate::store::{Store, Subscription};
use crate::txlog::TransactionLog;

/// Why an intent could not be settled
#[derive(Debug, Error)]
pub enum PaymentError {
    /// A payment event could not be decoded or encoded
    #[error("payment event: {0}")]
    Codec(#[from] serde_json::Error),
    /// The store failed
    #[error(transparent)]
    Store(#[from] TicketError),
    /// The transaction log could not be written
    #[error("transaction log: {0}")]
    Log(#[from] io::Error),
}

/// Outcome of processing one intent
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Settlement {
    /// Settled now, logged under this sequence number
    Settled(u64),
    /// A previous delivery already settled it
    AlreadySettled,
}

/// Consumer of payment intents
pub struct PaymentWorker {
    store: Arc<dyn Store>,
    payments: PaymentIntentRepository,
    log: TransactionLog,
    notifier: Notifier,
    settlement_delay: Duration,
}

impl PaymentWorker {
    /// Create a new [`PaymentWorker`]
    pub fn new(store: Arc<dyn Store>, log: TransactionLog, settlement_delay: Duration) -> Self {
        Self {
            payments: PaymentIntentRepository::new(store.clone()),
            notifier: Notifier::new(store.clone()),
            store,
            log,
            settlement_delay,
        }
    }

    /// Settle every intent left pending by an earlier run
    ///
    /// Returns how many were settled.
    pub fn recover(&self) -> usize {
        let pending = match self.payments.pending() {
            Ok(pending) => pending,
            Err(err) => {
                error!(%err, "could not read pending payments");
                return 0;
            }
        };
        let mut settled = 0;
        for intent in pending {
            match self.process(&intent) {
                Ok(Settlement::Settled(_)) => settled += 1,
                Ok(Settlement::AlreadySettled) => {}
                Err(err) => error!(ticket_id = %intent.ticket_id, %err, "recovery failed"),
            }
        }
        if settled > 0 {
            info!(settled, "recovered pending payments");
        }
        settled
    }

    /// Decode and process one message from [`channels::PAYMENT_EVENTS`]
    pub fn handle_message(&self, payload: &str) -> Result<Settlement, PaymentError> {
        let intent: PaymentIntent = serde_json::from_str(payload)?;
        self.process(&intent)
    }

    /// Settle `intent` unless that already happened
    pub fn process(&self, intent: &PaymentIntent) -> Result<Settlement, PaymentError> {
        if self.payments.status(&intent.ticket_id)? == Some(PaymentStatus::Settled) {
            debug!(ticket_id = %intent.ticket_id, "payment already settled");
            return Ok(Settlement::AlreadySettled);
        }

        // stands in for the payment gateway round trip
        thread::sleep(self.settlement_delay);

        let sequence = self.payments.next_sequence()?;
        let settled_at = Utc::now();
        self.log.append(sequence, intent, settled_at)?;
        self.payments.mark_settled(intent)?;

        let success = PaymentSuccess {
            ticket_id: intent.ticket_id.clone(),
            user_id: intent.user_id.clone(),
            timestamp: settled_at,
        };
        let payload = serde_json::to_string(&success)?;
        if let Err(err) = self.store.publish(channels::PAYMENT_SUCCESS, &payload) {
            warn!(ticket_id = %intent.ticket_id, %err, "could not publish payment success");
        }
        self.notifier.notify(
            &intent.user_id,
            Notification::payment_success(&intent.ticket_id, &intent.user_id, settled_at),
        );

        info!(ticket_id = %intent.ticket_id, user_id = %intent.user_id, sequence, "payment settled");
        Ok(Settlement::Settled(sequence))
    }

    /// Main loop: recover, then process intents in arrival order until
    /// `shutdown` fires
    pub fn run(self, intents: Subscription, shutdown: Receiver<()>) {
        self.recover();
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(intents.receiver()) -> msg => match msg {
                    Ok(msg) => {
                        if let Err(err) = self.handle_message(&msg.payload) {
                            error!(%err, "error processing payment");
                        }
                    }
                    Err(_) => break,
                },
            }
        }
    }
}
