//! Reacts to reservation records expiring in the store

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use crossbeam::select;
use ticket_reservation_core::{keys, Handoff};
use tracing::{debug, info, warn};

use crate::service::TicketService;
use crate::store::{Store, Subscription};

/// Background loop turning expiry events into handoffs
///
/// Events are at most once, so when the event stream stays quiet for an
/// interval the reaper also evicts due keys and sweeps for reservations
/// whose deadline passed.
pub struct ExpiryReaper {
    service: Arc<TicketService>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl ExpiryReaper {
    /// Create a new [`ExpiryReaper`]
    pub fn new(service: Arc<TicketService>, store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            service,
            store,
            interval,
        }
    }

    /// Handle the expiry of `key`; keys other than reservations are ignored
    pub fn on_expired(&self, key: &str) -> Option<Handoff> {
        let ticket_id = keys::ticket_id(key, keys::RESERVATION_PREFIX)?;
        match self.service.release_expired(ticket_id) {
            Ok(handoff) => {
                debug!(ticket_id, ?handoff, "handled expired reservation");
                Some(handoff)
            }
            Err(err) => {
                warn!(ticket_id, %err, "could not release expired reservation");
                None
            }
        }
    }

    /// Evict due keys and release whatever lapsed without an event
    pub fn sweep(&self) -> usize {
        if let Err(err) = self.store.evict_expired() {
            warn!(%err, "could not evict expired keys");
        }
        match self.service.sweep_expired() {
            Ok(released) => {
                if released > 0 {
                    info!(released, "swept lapsed reservations");
                }
                released
            }
            Err(err) => {
                warn!(%err, "sweep for lapsed reservations failed");
                0
            }
        }
    }

    /// Main loop, until `shutdown` fires or the subscription closes
    pub fn run(self, expired: Subscription, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(expired.receiver()) -> msg => match msg {
                    Ok(msg) => {
                        self.on_expired(&msg.payload);
                    }
                    Err(_) => break,
                },
                default(self.interval) => {
                    self.sweep();
                }
            }
        }
    }
}
