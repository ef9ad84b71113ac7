//! The reservation state machine
//!
//! Every transition follows the same shape: watch the keys it reads, decide,
//! stage the writes in a [`Batch`] and commit it with [`Store::exec`]. A
//! failed commit means somebody else changed one of the watched keys in the
//! meantime, so the whole step is re-run from the reads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use ticket_reservation_core::{
    channels, keys, Config, Handoff, Notification, PaymentIntent, Reservation, ReserveOutcome,
    Ticket, TicketError, TicketResult, TicketStatus, WaitingListItem,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notification::Notifier;
use crate::repository::{
    PaymentIntentRepository, PaymentStatus, ReservationRepository, TicketRepository,
    WaitingListRepository,
};
use crate::store::{Batch, Store, Watch};

/// Longest hold a reservation can get, whatever the configuration says
const MAX_HOLD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Result of one optimistic step
enum Step<T> {
    /// Committed (or nothing to commit)
    Done(T),
    /// A watched key changed before the commit
    Conflict,
    /// The ticket changed shape under our feet (e.g. a lapsed hold was
    /// released); re-read without charging the retry budget
    Again,
}

impl<T> Step<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Done(value) => Step::Done(f(value)),
            Step::Conflict => Step::Conflict,
            Step::Again => Step::Again,
        }
    }
}

/// Ticket, reservation and waiting-list operations on top of a [`Store`]
pub struct TicketService {
    store: Arc<dyn Store>,
    tickets: TicketRepository,
    reservations: ReservationRepository,
    waiting: WaitingListRepository,
    payments: PaymentIntentRepository,
    notifier: Notifier,
    ttl: chrono::Duration,
    attempts: u32,
}

impl TicketService {
    /// Create a new [`TicketService`]
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        let hold = config.reservation_ttl.min(MAX_HOLD);
        Self {
            tickets: TicketRepository::new(store.clone()),
            reservations: ReservationRepository::new(store.clone(), hold),
            waiting: WaitingListRepository::new(store.clone()),
            payments: PaymentIntentRepository::new(store.clone()),
            notifier: Notifier::new(store.clone()),
            ttl: chrono::Duration::from_std(hold).unwrap_or(chrono::Duration::MAX),
            attempts: config.reserve_attempts.max(1),
            store,
        }
    }

    /// Create an available ticket with the given id
    pub fn create_ticket(&self, ticket_id: &str) -> TicketResult<Ticket> {
        let ticket = Ticket::new(ticket_id);
        self.tickets.create(&ticket)?;
        info!(ticket_id, "ticket created");
        Ok(ticket)
    }

    /// Create an available ticket with a random id
    pub fn create_ticket_generated(&self) -> TicketResult<Ticket> {
        self.create_ticket(&Uuid::new_v4().to_string())
    }

    /// Fetch a ticket
    ///
    /// A reservation found to have lapsed is released (or handed over) first,
    /// so the caller never observes a stale hold.
    pub fn get_ticket(&self, ticket_id: &str) -> TicketResult<Ticket> {
        let ticket = self.load(ticket_id)?;
        if self.is_lapsed(&ticket, Utc::now())? {
            self.release_expired(ticket_id)?;
            return self.load(ticket_id);
        }
        Ok(ticket)
    }

    /// Snapshot of every ticket
    pub fn list_tickets(&self) -> TicketResult<Vec<Ticket>> {
        self.tickets.list()
    }

    /// Reserve `ticket_id` for `user_id`, or append the user to the waiting
    /// list if somebody holds it
    pub fn reserve_ticket(&self, ticket_id: &str, user_id: &str) -> TicketResult<ReserveOutcome> {
        let ticket_key = keys::ticket(ticket_id);
        let reservation_key = keys::reservation(ticket_id);

        self.with_optimistic_retry(ticket_id, || {
            let watch = self
                .store
                .watch(&[ticket_key.as_str(), reservation_key.as_str()])?;
            let ticket = self.load(ticket_id)?;
            let now = Utc::now();
            if self.is_lapsed(&ticket, now)? {
                self.release_expired(ticket_id)?;
                return Ok(Step::Again);
            }

            match ticket.status {
                TicketStatus::Paid => Err(TicketError::AlreadyPaid(ticket_id.to_owned())),
                TicketStatus::Reserved => Ok(self
                    .enqueue(&watch, ticket_id, user_id, now)?
                    .map(|position| ReserveOutcome::Queued { position })),
                TicketStatus::Available => {
                    let reserved = ticket.reserved_for(user_id, now, self.ttl);
                    let mut batch = Batch::new();
                    self.stage_hold(&mut batch, &reserved)?;
                    if !self.store.exec(&watch, batch)? {
                        return Ok(Step::Conflict);
                    }
                    info!(ticket_id, user_id, "ticket reserved");
                    Ok(Step::Done(ReserveOutcome::Reserved(reserved)))
                }
            }
        })
    }

    /// Buy a ticket the caller holds
    ///
    /// The ticket turns `paid` together with a durable payment intent; the
    /// intent is then published for the payment worker. Settlement happens
    /// asynchronously.
    pub fn pay(&self, ticket_id: &str, user_id: &str) -> TicketResult<Ticket> {
        let ticket_key = keys::ticket(ticket_id);
        let reservation_key = keys::reservation(ticket_id);

        let (paid, intent) = self.with_optimistic_retry(ticket_id, || {
            let watch = self
                .store
                .watch(&[ticket_key.as_str(), reservation_key.as_str()])?;
            let ticket = self.load(ticket_id)?;
            match ticket.status {
                TicketStatus::Paid => return Err(TicketError::AlreadyPaid(ticket_id.to_owned())),
                TicketStatus::Available => {
                    return Err(TicketError::InvalidState(format!("{ticket_id} is not reserved")))
                }
                TicketStatus::Reserved => {}
            }
            if !ticket.is_reserved_by(user_id) {
                return Err(TicketError::InvalidState(format!(
                    "{ticket_id} is not reserved by {user_id}"
                )));
            }
            let now = Utc::now();
            if self.is_lapsed(&ticket, now)? {
                self.release_expired(ticket_id)?;
                return Err(TicketError::InvalidState(format!(
                    "reservation of {ticket_id} has expired"
                )));
            }

            let paid = ticket.paid();
            let intent = PaymentIntent {
                ticket_id: ticket_id.to_owned(),
                user_id: user_id.to_owned(),
                timestamp: now,
            };
            let mut batch = Batch::new();
            self.tickets.stage_put(&mut batch, &paid)?;
            self.reservations.stage_cancel(&mut batch, ticket_id);
            self.payments.stage_intent(&mut batch, &intent);
            if !self.store.exec(&watch, batch)? {
                return Ok(Step::Conflict);
            }
            Ok(Step::Done((paid, intent)))
        })?;

        info!(ticket_id, user_id, "ticket paid");
        // the intent is durable, a lost publish is picked up on worker recovery
        match serde_json::to_string(&intent) {
            Ok(payload) => {
                if let Err(err) = self.store.publish(channels::PAYMENT_EVENTS, &payload) {
                    warn!(ticket_id, %err, "could not publish payment intent");
                }
            }
            Err(err) => warn!(ticket_id, %err, "could not encode payment intent"),
        }
        Ok(paid)
    }

    /// Give up the caller's reservation; the head of the waiting list takes
    /// over if there is one
    pub fn cancel_reservation(&self, ticket_id: &str, user_id: &str) -> TicketResult<Handoff> {
        let ticket_key = keys::ticket(ticket_id);
        let reservation_key = keys::reservation(ticket_id);
        let waiting_key = keys::waiting(ticket_id);

        let handoff = self.with_optimistic_retry(ticket_id, || {
            let watch = self.store.watch(&[
                ticket_key.as_str(),
                reservation_key.as_str(),
                waiting_key.as_str(),
            ])?;
            let ticket = self.load(ticket_id)?;
            match ticket.status {
                TicketStatus::Paid => return Err(TicketError::AlreadyPaid(ticket_id.to_owned())),
                TicketStatus::Available => {
                    return Err(TicketError::InvalidState(format!("{ticket_id} is not reserved")))
                }
                TicketStatus::Reserved => {}
            }
            if !ticket.is_reserved_by(user_id) {
                return Err(TicketError::InvalidState(format!(
                    "{ticket_id} is not reserved by {user_id}"
                )));
            }

            let mut batch = Batch::new();
            let handoff = self.stage_handoff(&mut batch, &ticket, Utc::now())?;
            if !self.store.exec(&watch, batch)? {
                return Ok(Step::Conflict);
            }
            Ok(Step::Done(handoff))
        })?;

        info!(ticket_id, user_id, "reservation cancelled");
        self.announce(ticket_id, &handoff);
        Ok(handoff)
    }

    /// Hand a ticket whose hold has lapsed to the next waiter, or make it
    /// available again
    ///
    /// Returns [`Handoff::Unchanged`] if the reservation is still live or was
    /// already dealt with, so expiry events may be delivered more than once.
    pub fn release_expired(&self, ticket_id: &str) -> TicketResult<Handoff> {
        let ticket_key = keys::ticket(ticket_id);
        let reservation_key = keys::reservation(ticket_id);
        let waiting_key = keys::waiting(ticket_id);

        let (previous, handoff) = self.with_optimistic_retry(ticket_id, || {
            let watch = self.store.watch(&[
                ticket_key.as_str(),
                reservation_key.as_str(),
                waiting_key.as_str(),
            ])?;
            let Some(ticket) = self.tickets.get(ticket_id)? else {
                return Ok(Step::Done((None, Handoff::Unchanged)));
            };
            let now = Utc::now();
            if !self.is_lapsed(&ticket, now)? {
                return Ok(Step::Done((None, Handoff::Unchanged)));
            }

            let mut batch = Batch::new();
            let handoff = self.stage_handoff(&mut batch, &ticket, now)?;
            if !self.store.exec(&watch, batch)? {
                return Ok(Step::Conflict);
            }
            Ok(Step::Done((ticket.reserved_by, handoff)))
        })?;

        if let Some(previous) = previous {
            info!(ticket_id, user_id = %previous, "reservation expired");
            self.notifier
                .notify(&previous, Notification::reservation_expired(ticket_id, &previous));
        }
        self.announce(ticket_id, &handoff);
        Ok(handoff)
    }

    /// Release every lapsed reservation; returns how many tickets changed
    ///
    /// Backstop for expiry events that were never delivered.
    pub fn sweep_expired(&self) -> TicketResult<usize> {
        let now = Utc::now();
        let mut released = 0;
        for ticket in self.tickets.list()? {
            if ticket.status != TicketStatus::Reserved {
                continue;
            }
            let result = self.is_lapsed(&ticket, now).and_then(|lapsed| {
                if lapsed {
                    self.release_expired(&ticket.id)
                } else {
                    Ok(Handoff::Unchanged)
                }
            });
            match result {
                Ok(Handoff::Unchanged) => {}
                Ok(_) => released += 1,
                Err(err) => warn!(ticket_id = %ticket.id, %err, "could not release lapsed reservation"),
            }
        }
        Ok(released)
    }

    /// Append `user_id` to the waiting list of a ticket that is not sold;
    /// returns the 1-based position
    pub fn join_waiting_list(&self, ticket_id: &str, user_id: &str) -> TicketResult<usize> {
        let ticket_key = keys::ticket(ticket_id);
        let reservation_key = keys::reservation(ticket_id);

        self.with_optimistic_retry(ticket_id, || {
            let watch = self
                .store
                .watch(&[ticket_key.as_str(), reservation_key.as_str()])?;
            let ticket = self.load(ticket_id)?;
            let now = Utc::now();
            if self.is_lapsed(&ticket, now)? {
                self.release_expired(ticket_id)?;
                return Ok(Step::Again);
            }
            if ticket.status == TicketStatus::Paid {
                return Err(TicketError::AlreadyPaid(ticket_id.to_owned()));
            }
            self.enqueue(&watch, ticket_id, user_id, now)
        })
    }

    /// Remove the earliest entry of `user_id` from a ticket's waiting list
    pub fn leave_waiting_list(&self, ticket_id: &str, user_id: &str) -> TicketResult<()> {
        if !self.waiting.remove(ticket_id, user_id)? {
            return Err(TicketError::NotFound(format!(
                "{user_id} is not waiting for {ticket_id}"
            )));
        }
        info!(ticket_id, user_id, "left waiting list");
        Ok(())
    }

    /// A ticket's waiting list with positions
    pub fn waiting_list(&self, ticket_id: &str) -> TicketResult<Vec<WaitingListItem>> {
        self.load(ticket_id)?;
        self.waiting.get_by_ticket(ticket_id)
    }

    /// Position of the first entry of `user_id`, if queued
    pub fn waiting_position(&self, ticket_id: &str, user_id: &str) -> TicketResult<Option<usize>> {
        self.waiting.get_position(ticket_id, user_id)
    }

    /// Active reservations held by `user_id`
    pub fn reservations_for(&self, user_id: &str) -> TicketResult<Vec<Reservation>> {
        self.reservations.get_by_user(user_id)
    }

    /// Waiting-list entries of `user_id` across all tickets
    pub fn waiting_entries_for(&self, user_id: &str) -> TicketResult<Vec<WaitingListItem>> {
        self.waiting.get_by_user(user_id)
    }

    /// The ticket's settlement state, once paid
    pub fn payment_status(&self, ticket_id: &str) -> TicketResult<Option<PaymentStatus>> {
        self.payments.status(ticket_id)
    }

    fn load(&self, ticket_id: &str) -> TicketResult<Ticket> {
        self.tickets
            .get(ticket_id)?
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_owned()))
    }

    /// A reservation is over once its deadline passed or its record is gone
    fn is_lapsed(&self, ticket: &Ticket, now: DateTime<Utc>) -> TicketResult<bool> {
        Ok(ticket.status == TicketStatus::Reserved
            && (ticket.is_lapsed(now) || !self.reservations.is_active(&ticket.id)?))
    }

    fn enqueue(
        &self,
        watch: &Watch,
        ticket_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> TicketResult<Step<usize>> {
        let item = WaitingListItem::new(ticket_id, user_id, now);
        let mut batch = Batch::new();
        self.waiting.stage_add(&mut batch, &item)?;
        if !self.store.exec(watch, batch)? {
            return Ok(Step::Conflict);
        }
        // missing only if a handoff already promoted the entry from the head
        let position = self.waiting.position_of(&item)?.unwrap_or(1);
        info!(ticket_id, user_id, position, "joined waiting list");
        Ok(Step::Done(position))
    }

    fn stage_hold(&self, batch: &mut Batch, reserved: &Ticket) -> TicketResult<()> {
        self.tickets.stage_put(batch, reserved)?;
        if let Some(reservation) = Reservation::of(reserved) {
            self.reservations.stage_reserve(batch, &reservation)?;
        }
        Ok(())
    }

    /// Stage the end of `ticket`'s current hold
    fn stage_handoff(
        &self,
        batch: &mut Batch,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> TicketResult<Handoff> {
        match self.waiting.head(&ticket.id)? {
            Some(next) => {
                self.waiting.stage_pop_head(batch, &ticket.id);
                self.stage_hold(batch, &ticket.reserved_for(&next.user_id, now, self.ttl))?;
                Ok(Handoff::Promoted(next))
            }
            None => {
                self.tickets.stage_put(batch, &ticket.released())?;
                self.reservations.stage_cancel(batch, &ticket.id);
                Ok(Handoff::Released)
            }
        }
    }

    fn announce(&self, ticket_id: &str, handoff: &Handoff) {
        if let Handoff::Promoted(next) = handoff {
            info!(ticket_id, user_id = %next.user_id, "waiting user promoted");
            self.notifier.notify(
                &next.user_id,
                Notification::ticket_available(ticket_id, &next.user_id),
            );
        }
    }

    /// Run `step` until it commits, fails, or conflicts too often
    fn with_optimistic_retry<T>(
        &self,
        ticket_id: &str,
        mut step: impl FnMut() -> TicketResult<Step<T>>,
    ) -> TicketResult<T> {
        let mut conflicts = 0;
        loop {
            match step()? {
                Step::Done(value) => return Ok(value),
                Step::Again => continue,
                Step::Conflict => {
                    conflicts += 1;
                    if conflicts >= self.attempts {
                        warn!(ticket_id, conflicts, "giving up after repeated conflicts");
                        return Err(TicketError::Conflict(ticket_id.to_owned()));
                    }
                    debug!(ticket_id, conflicts, "concurrent update, retrying");
                    backoff(conflicts);
                }
            }
        }
    }
}

fn backoff(attempt: u32) {
    let ceiling = 2u64 << attempt.min(6);
    let pause = rand::thread_rng().gen_range(0..=ceiling);
    thread::sleep(Duration::from_millis(pause));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use ticket_reservation_core::ErrorKind;

    use super::*;
    use crate::store::{MemoryStore, StoreResult, Subscription};

    /// A store on which every commit loses the race once `refuse` is set
    #[derive(Default)]
    struct Contended {
        inner: MemoryStore,
        refuse: AtomicBool,
        commits: AtomicU32,
    }

    impl Store for Contended {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set(key, value, ttl)
        }
        fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
            self.inner.set_nx(key, value)
        }
        fn del(&self, key: &str) -> StoreResult<bool> {
            self.inner.del(key)
        }
        fn exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key)
        }
        fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            self.inner.pttl(key)
        }
        fn incr(&self, key: &str) -> StoreResult<i64> {
            self.inner.incr(key)
        }
        fn decr(&self, key: &str) -> StoreResult<i64> {
            self.inner.decr(key)
        }
        fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
            self.inner.rpush(key, value)
        }
        fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.lpop(key)
        }
        fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
            self.inner.lrange(key, start, stop)
        }
        fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<usize> {
            self.inner.lrem(key, count, value)
        }
        fn llen(&self, key: &str) -> StoreResult<usize> {
            self.inner.llen(key)
        }
        fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
            self.inner.hset(key, field, value)
        }
        fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
            self.inner.hget(key, field)
        }
        fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
            self.inner.hgetall(key)
        }
        fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.inner.sadd(key, member)
        }
        fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.inner.srem(key, member)
        }
        fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.inner.sismember(key, member)
        }
        fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.smembers(key)
        }
        fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
            self.inner.scan_prefix(prefix)
        }
        fn watch(&self, keys: &[&str]) -> StoreResult<Watch> {
            self.inner.watch(keys)
        }
        fn exec(&self, watch: &Watch, batch: Batch) -> StoreResult<bool> {
            if self.refuse.load(Ordering::SeqCst) {
                self.commits.fetch_add(1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.exec(watch, batch)
        }
        fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
            self.inner.publish(channel, payload)
        }
        fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
            self.inner.subscribe(channel)
        }
    }

    fn service() -> (Arc<dyn Store>, TicketService) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let service = TicketService::new(store.clone(), &Config::default());
        (store, service)
    }

    #[test]
    fn reserve_then_queue() {
        let (_, service) = service();
        service.create_ticket("T1").unwrap();

        let ReserveOutcome::Reserved(ticket) = service.reserve_ticket("T1", "alice").unwrap() else {
            panic!("expected a reservation");
        };
        assert_eq!(ticket.reserved_by.as_deref(), Some("alice"));
        assert_eq!(
            service.reserve_ticket("T1", "bob").unwrap(),
            ReserveOutcome::Queued { position: 1 }
        );
        assert_eq!(
            service.reserve_ticket("T1", "carol").unwrap(),
            ReserveOutcome::Queued { position: 2 }
        );
        assert_eq!(service.reservations_for("alice").unwrap().len(), 1);
    }

    #[test]
    fn unknown_ticket_is_not_found() {
        let (_, service) = service();
        assert_eq!(
            service.reserve_ticket("nope", "alice").unwrap_err().kind(),
            ticket_reservation_core::ErrorKind::NotFound
        );
        assert!(matches!(service.get_ticket("nope"), Err(TicketError::NotFound(_))));
    }

    #[test]
    fn cancel_promotes_head() {
        let (_, service) = service();
        service.create_ticket("T1").unwrap();
        service.reserve_ticket("T1", "alice").unwrap();
        service.reserve_ticket("T1", "bob").unwrap();

        let Handoff::Promoted(next) = service.cancel_reservation("T1", "alice").unwrap() else {
            panic!("expected a promotion");
        };
        assert_eq!(next.user_id, "bob");
        let ticket = service.get_ticket("T1").unwrap();
        assert_eq!(ticket.reserved_by.as_deref(), Some("bob"));
        assert!(service.waiting_list("T1").unwrap().is_empty());
    }

    #[test]
    fn cancel_without_waiters_releases() {
        let (_, service) = service();
        service.create_ticket("T1").unwrap();
        service.reserve_ticket("T1", "alice").unwrap();

        assert_eq!(service.cancel_reservation("T1", "alice").unwrap(), Handoff::Released);
        assert_eq!(service.get_ticket("T1").unwrap(), Ticket::new("T1"));
        assert!(matches!(
            service.cancel_reservation("T1", "alice"),
            Err(TicketError::InvalidState(_))
        ));
    }

    #[test]
    fn only_the_holder_pays_once() {
        let (store, service) = service();
        let intents = store.subscribe(channels::PAYMENT_EVENTS).unwrap();
        service.create_ticket("T1").unwrap();
        service.reserve_ticket("T1", "alice").unwrap();

        assert!(matches!(service.pay("T1", "bob"), Err(TicketError::InvalidState(_))));
        let paid = service.pay("T1", "alice").unwrap();
        assert_eq!(paid.status, TicketStatus::Paid);
        assert!(matches!(service.pay("T1", "alice"), Err(TicketError::AlreadyPaid(_))));
        assert!(matches!(
            service.cancel_reservation("T1", "alice"),
            Err(TicketError::AlreadyPaid(_))
        ));
        assert!(matches!(service.reserve_ticket("T1", "bob"), Err(TicketError::AlreadyPaid(_))));

        let intent: PaymentIntent = serde_json::from_str(&intents.try_recv().unwrap().payload).unwrap();
        assert_eq!(intent.user_id, "alice");
        assert_eq!(
            service.payment_status("T1").unwrap(),
            Some(PaymentStatus::Pending)
        );
    }

    #[test]
    fn lapsed_hold_is_handed_over_on_read() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Config::default().with_reservation_ttl(Duration::from_millis(100));
        let service = TicketService::new(store, &config);
        service.create_ticket("T1").unwrap();
        service.reserve_ticket("T1", "alice").unwrap();
        service.join_waiting_list("T1", "bob").unwrap();

        thread::sleep(Duration::from_millis(200));
        assert!(matches!(service.pay("T1", "alice"), Err(TicketError::InvalidState(_))));
        let ticket = service.get_ticket("T1").unwrap();
        assert_eq!(ticket.reserved_by.as_deref(), Some("bob"));
    }

    #[test]
    fn leaving_removes_earliest_entry() {
        let (_, service) = service();
        service.create_ticket("T1").unwrap();
        service.reserve_ticket("T1", "alice").unwrap();
        assert_eq!(service.join_waiting_list("T1", "bob").unwrap(), 1);
        assert_eq!(service.join_waiting_list("T1", "carol").unwrap(), 2);
        assert_eq!(service.join_waiting_list("T1", "bob").unwrap(), 3);

        service.leave_waiting_list("T1", "bob").unwrap();
        let users: Vec<_> = service
            .waiting_list("T1")
            .unwrap()
            .into_iter()
            .map(|item| (item.user_id, item.position))
            .collect();
        assert_eq!(users, [("carol".to_owned(), 1), ("bob".to_owned(), 2)]);
        assert_eq!(service.waiting_position("T1", "bob").unwrap(), Some(2));
        assert_eq!(service.waiting_entries_for("bob").unwrap().len(), 1);

        service.leave_waiting_list("T1", "bob").unwrap();
        assert!(matches!(
            service.leave_waiting_list("T1", "bob"),
            Err(TicketError::NotFound(_))
        ));
    }

    #[test]
    fn conflict_after_exhausting_attempts() {
        let store = Arc::new(Contended::default());
        let config = Config::default();
        let service = TicketService::new(store.clone(), &config);
        service.create_ticket("T1").unwrap();

        store.refuse.store(true, Ordering::SeqCst);
        let err = service.reserve_ticket("T1", "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
        assert_eq!(store.commits.load(Ordering::SeqCst), config.reserve_attempts);

        store.refuse.store(false, Ordering::SeqCst);
        assert_eq!(service.get_ticket("T1").unwrap(), Ticket::new("T1"));
        assert!(matches!(
            service.reserve_ticket("T1", "alice").unwrap(),
            ReserveOutcome::Reserved(_)
        ));
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Config::from_lookup(|key| {
            (key == "RESERVATION_TTL").then(|| u64::MAX.to_string())
        });
        let service = TicketService::new(store.clone(), &config);
        service.create_ticket("T1").unwrap();

        let ReserveOutcome::Reserved(ticket) = service.reserve_ticket("T1", "alice").unwrap() else {
            panic!("expected a reservation");
        };
        assert!(ticket.expires_at.is_some());
        assert!(store.pttl("reservation:T1").unwrap().is_some_and(|ttl| ttl <= MAX_HOLD));
        assert_eq!(service.get_ticket("T1").unwrap(), ticket);
    }
}
