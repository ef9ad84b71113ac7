//! Best-effort fan-out of notifications to connected clients
//!
//! The service only ever publishes through a [`Notifier`]; the
//! [`NotificationRelay`] picks messages up from the store and hands them to
//! the process-local [`NotificationDispatcher`]. Delivery is at most once:
//! a client whose buffer is full simply misses the notification.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::Receiver;
use crossbeam::select;
use flume::TrySendError;
use parking_lot::RwLock;
use ticket_reservation_core::{channels, Notification, UserNotification};
use tracing::{debug, error, warn};

use crate::store::{Store, Subscription};

/// Result of [`NotificationDispatcher::notify_user`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Delivery {
    /// Queued on the client's channel
    Delivered,
    /// The client's buffer was full; the notification is gone
    Dropped,
    /// The user has no live channel in this process
    NoClient,
}

/// Registry of open delivery channels, one per connected user
///
/// Connects and disconnects take the lock exclusively, lookups share it.
/// The registry is per process.
pub struct NotificationDispatcher {
    clients: RwLock<HashMap<String, flume::Sender<Notification>>>,
    capacity: usize,
}

impl NotificationDispatcher {
    /// Create a new [`NotificationDispatcher`] whose channels buffer `capacity` notifications
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a fresh channel for `user_id`, replacing any previous one
    pub fn connect(&self, user_id: &str) -> flume::Receiver<Notification> {
        let (sender, receiver) = flume::bounded(self.capacity);
        self.add_client(user_id, sender);
        receiver
    }

    /// Register a caller-provided channel for `user_id`
    pub fn add_client(&self, user_id: &str, sender: flume::Sender<Notification>) {
        self.clients.write().insert(user_id.to_owned(), sender);
    }

    /// Forget the channel of `user_id`; returns whether one was registered
    pub fn remove_client(&self, user_id: &str) -> bool {
        self.clients.write().remove(user_id).is_some()
    }

    /// Number of registered channels
    pub fn connected(&self) -> usize {
        self.clients.read().len()
    }

    /// Hand `notification` to the channel of `user_id` without blocking
    pub fn notify_user(&self, user_id: &str, notification: &Notification) -> Delivery {
        let Some(sender) = self.clients.read().get(user_id).cloned() else {
            return Delivery::NoClient;
        };
        match sender.try_send(notification.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(user_id, kind = ?notification.kind, "client buffer full, dropping notification");
                Delivery::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                let mut clients = self.clients.write();
                // the client may have reconnected in between
                if clients.get(user_id).is_some_and(|s| s.same_channel(&sender)) {
                    clients.remove(user_id);
                }
                Delivery::NoClient
            }
        }
    }
}

/// Publishes notifications addressed to one user on
/// [`channels::NOTIFICATION_EVENTS`]
///
/// Never fails the caller: notifications are advisory.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
}

impl Notifier {
    /// Create a new [`Notifier`]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Publish `notification` for `user_id`
    pub fn notify(&self, user_id: &str, notification: Notification) {
        let envelope = UserNotification {
            user_id: user_id.to_owned(),
            notification,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                error!(user_id, %err, "could not encode notification");
                return;
            }
        };
        if let Err(err) = self.store.publish(channels::NOTIFICATION_EVENTS, &payload) {
            warn!(user_id, %err, "could not publish notification");
        }
    }
}

/// Background loop forwarding [`channels::NOTIFICATION_EVENTS`] to the dispatcher
pub struct NotificationRelay {
    dispatcher: Arc<NotificationDispatcher>,
}

impl NotificationRelay {
    /// Create a new [`NotificationRelay`]
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Forward one raw message
    pub fn forward(&self, payload: &str) -> Option<Delivery> {
        match serde_json::from_str::<UserNotification>(payload) {
            Ok(envelope) => {
                let delivery = self
                    .dispatcher
                    .notify_user(&envelope.user_id, &envelope.notification);
                debug!(user_id = %envelope.user_id, ?delivery, "relayed notification");
                Some(delivery)
            }
            Err(err) => {
                error!(%err, "skipping malformed notification");
                None
            }
        }
    }

    /// Main loop, until `shutdown` fires or the subscription closes
    pub fn run(self, events: Subscription, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(events.receiver()) -> msg => match msg {
                    Ok(msg) => {
                        self.forward(&msg.payload);
                    }
                    Err(_) => break,
                },
            }
        }
    }
}
