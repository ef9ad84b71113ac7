//! :ticket: Ticket reservation engine
//!
//! The engine is made up of the [ticket service][TicketService], the
//! [notification dispatcher][NotificationDispatcher], the
//! [payment worker][PaymentWorker] and the [expiry reaper][ExpiryReaper],
//! all sharing one [`Store`]. The service is the only component mutating
//! tickets on behalf of callers; the background threads talk to it and to
//! each other exclusively through the store's channels.

#![warn(missing_docs)]
use std::io;
use std::sync::Arc;

use ticket_reservation_core::{
    channels, Config, Request, RequestHandler, Response, TicketResult,
};
use tracing::{debug, info};

mod notification;
mod payment;
mod reaper;
pub mod repository;
mod service;
pub mod store;
mod txlog;
mod worker;

pub use notification::{Delivery, NotificationDispatcher, NotificationRelay, Notifier};
pub use payment::{PaymentError, PaymentWorker, Settlement};
pub use reaper::ExpiryReaper;
pub use service::TicketService;
pub use store::{MemoryStore, Store};
pub use txlog::TransactionLog;
use worker::Worker;

/// Entrypoint of the engine
///
/// Subscribes the background components before any request can be served,
/// so no event published by the returned [`Engine`] is missed.
pub fn launch(config: &Config, store: Arc<dyn Store>) -> io::Result<Engine> {
    let service = Arc::new(TicketService::new(store.clone(), config));
    let dispatcher = Arc::new(NotificationDispatcher::new(config.notification_buffer));
    let log = TransactionLog::open(&config.transaction_log)?;

    let notifications = store.subscribe(channels::NOTIFICATION_EVENTS).map_err(io::Error::other)?;
    let intents = store.subscribe(channels::PAYMENT_EVENTS).map_err(io::Error::other)?;
    let expired = store.subscribe(channels::EXPIRED_KEYS).map_err(io::Error::other)?;

    let relay = NotificationRelay::new(dispatcher.clone());
    let payments = PaymentWorker::new(store.clone(), log, config.settlement_delay);
    let reaper = ExpiryReaper::new(service.clone(), store.clone(), config.reaper_interval);

    let workers = vec![
        Worker::spawn("notification-relay", move |shutdown| {
            relay.run(notifications, shutdown)
        })?,
        Worker::spawn("payment-worker", move |shutdown| {
            payments.run(intents, shutdown)
        })?,
        Worker::spawn("expiry-reaper", move |shutdown| {
            reaper.run(expired, shutdown)
        })?,
    ];
    info!(
        ttl = ?config.reservation_ttl,
        log = %config.transaction_log.display(),
        "engine launched"
    );

    Ok(Engine {
        service,
        dispatcher,
        store,
        workers,
    })
}

/// A running engine: the service plus its background threads
pub struct Engine {
    service: Arc<TicketService>,
    dispatcher: Arc<NotificationDispatcher>,
    store: Arc<dyn Store>,
    workers: Vec<Worker>,
}

impl Engine {
    /// The ticket service
    pub fn service(&self) -> &Arc<TicketService> {
        &self.service
    }

    /// Where clients connect for notifications
    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// The shared store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

impl RequestHandler for Engine {
    fn handle(&self, request: Request) -> TicketResult<Response> {
        debug!(kind = ?request.kind(), ticket_id = request.ticket_id(), "handling request");
        let service = &self.service;
        match request {
            Request::CreateTicket { ticket_id: Some(ticket_id) } => {
                service.create_ticket(&ticket_id).map(Response::Ticket)
            }
            Request::CreateTicket { ticket_id: None } => {
                service.create_ticket_generated().map(Response::Ticket)
            }
            Request::ListTickets => service.list_tickets().map(Response::Tickets),
            Request::GetTicket { ticket_id } => service.get_ticket(&ticket_id).map(Response::Ticket),
            Request::ReserveTicket { ticket_id, user_id } => service
                .reserve_ticket(&ticket_id, &user_id)
                .map(Response::Reserve),
            Request::CancelReservation { ticket_id, user_id } => service
                .cancel_reservation(&ticket_id, &user_id)
                .map(Response::Cancelled),
            Request::Pay { ticket_id, user_id } => {
                service.pay(&ticket_id, &user_id).map(Response::Ticket)
            }
            Request::JoinWaitingList { ticket_id, user_id } => service
                .join_waiting_list(&ticket_id, &user_id)
                .map(Response::Position),
            Request::LeaveWaitingList { ticket_id, user_id } => service
                .leave_waiting_list(&ticket_id, &user_id)
                .map(|()| Response::Left),
            Request::WaitingList { ticket_id } => {
                service.waiting_list(&ticket_id).map(Response::WaitingList)
            }
        }
    }

    fn shutdown(self) {
        for worker in self.workers {
            worker.stop();
        }
        info!("engine shut down");
    }
}
