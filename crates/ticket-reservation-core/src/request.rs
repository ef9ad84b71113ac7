use crate::{TicketResult, Ticket, WaitingListItem};

/// Kind of the request
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum RequestKind {
    /// Create an available ticket (administrative)
    CreateTicket,

    /// Snapshot of every ticket in store order
    ///
    /// 📌 Hint: No consistency guarantee across concurrently mutating tickets.
    ListTickets,

    /// Fetch a single ticket
    GetTicket,

    /// Reserve a ticket, or join its waiting list if somebody else holds it
    ReserveTicket,

    /// Give up a reservation; the head of the waiting list is promoted
    CancelReservation,

    /// Buy a previously reserved ticket
    Pay,

    /// Queue up for a ticket explicitly
    JoinWaitingList,

    /// Leave a ticket's waiting list
    LeaveWaitingList,

    /// Read a ticket's waiting list with positions
    WaitingList,
}

/// Operation requested by the (external) transport layer
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Request {
    /// See [`RequestKind::CreateTicket`]; a random id is generated if none is given
    CreateTicket {
        /// Caller-assigned id
        ticket_id: Option<String>,
    },
    /// See [`RequestKind::ListTickets`]
    ListTickets,
    /// See [`RequestKind::GetTicket`]
    GetTicket {
        /// Requested ticket
        ticket_id: String,
    },
    /// See [`RequestKind::ReserveTicket`]
    ReserveTicket {
        /// Requested ticket
        ticket_id: String,
        /// Caller
        user_id: String,
    },
    /// See [`RequestKind::CancelReservation`]
    CancelReservation {
        /// Requested ticket
        ticket_id: String,
        /// Caller
        user_id: String,
    },
    /// See [`RequestKind::Pay`]
    Pay {
        /// Requested ticket
        ticket_id: String,
        /// Caller
        user_id: String,
    },
    /// See [`RequestKind::JoinWaitingList`]
    JoinWaitingList {
        /// Requested ticket
        ticket_id: String,
        /// Caller
        user_id: String,
    },
    /// See [`RequestKind::LeaveWaitingList`]
    LeaveWaitingList {
        /// Requested ticket
        ticket_id: String,
        /// Caller
        user_id: String,
    },
    /// See [`RequestKind::WaitingList`]
    WaitingList {
        /// Requested ticket
        ticket_id: String,
    },
}

impl Request {
    /// Get the request's kind
    #[inline]
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::CreateTicket { .. } => RequestKind::CreateTicket,
            Request::ListTickets => RequestKind::ListTickets,
            Request::GetTicket { .. } => RequestKind::GetTicket,
            Request::ReserveTicket { .. } => RequestKind::ReserveTicket,
            Request::CancelReservation { .. } => RequestKind::CancelReservation,
            Request::Pay { .. } => RequestKind::Pay,
            Request::JoinWaitingList { .. } => RequestKind::JoinWaitingList,
            Request::LeaveWaitingList { .. } => RequestKind::LeaveWaitingList,
            Request::WaitingList { .. } => RequestKind::WaitingList,
        }
    }

    /// Get the ticket the request is about, if any
    #[inline]
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Request::CreateTicket { ticket_id } => ticket_id.as_deref(),
            Request::ListTickets => None,
            Request::GetTicket { ticket_id }
            | Request::WaitingList { ticket_id }
            | Request::ReserveTicket { ticket_id, .. }
            | Request::CancelReservation { ticket_id, .. }
            | Request::Pay { ticket_id, .. }
            | Request::JoinWaitingList { ticket_id, .. }
            | Request::LeaveWaitingList { ticket_id, .. } => Some(ticket_id),
        }
    }

    /// Get the calling user, if the request carries one
    #[inline]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Request::ReserveTicket { user_id, .. }
            | Request::CancelReservation { user_id, .. }
            | Request::Pay { user_id, .. }
            | Request::JoinWaitingList { user_id, .. }
            | Request::LeaveWaitingList { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// Successful result of `ReserveTicket`
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ReserveOutcome {
    /// The caller now holds the ticket
    Reserved(Ticket),
    /// Somebody else holds it; the caller was appended to the waiting list
    Queued {
        /// 1-based position right after joining
        position: usize,
    },
}

/// What happened to a ticket when its reservation ended
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Handoff {
    /// Nobody was waiting; the ticket is available again
    Released,
    /// The head of the waiting list now holds the ticket
    Promoted(WaitingListItem),
    /// The reservation had already ended (or never existed); nothing changed
    Unchanged,
}

/// Successful result of a [`Request`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Response {
    /// A single ticket
    Ticket(Ticket),
    /// Several tickets
    Tickets(Vec<Ticket>),
    /// Outcome of a reservation attempt
    Reserve(ReserveOutcome),
    /// Outcome of a cancellation
    Cancelled(Handoff),
    /// Position in a waiting list
    Position(usize),
    /// The caller left the waiting list
    Left,
    /// A waiting list with positions
    WaitingList(Vec<WaitingListItem>),
}

/// Interface for handling requests from the transport layer
///
/// 📌 Hint: The engine implements this trait.
pub trait RequestHandler {
    /// Handle a request
    ///
    /// This method may be called concurrently from different threads.
    fn handle(&self, request: Request) -> TicketResult<Response>;

    /// Shut the reservation system down
    ///
    /// This method waits for all threads spawned for the system (e.g., the
    /// payment worker and the reaper) to have terminated.
    fn shutdown(self);
}
