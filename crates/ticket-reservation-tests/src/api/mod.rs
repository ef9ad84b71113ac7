use std::sync::Arc;

use eyre::Result;
use flume::Sender;
use nanorand::Rng;
use thiserror::Error;
use ticket_reservation_core::{
    ErrorKind, Handoff, Request, RequestKind, ReserveOutcome, Response, Ticket, TicketError,
    TicketResult, WaitingListItem,
};
use tokio::sync::oneshot;

pub mod mock;

/// Error answer of the engine
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<TicketError> for ApiError {
    fn from(err: TicketError) -> Self {
        ApiError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

struct RequestMsg {
    request: Request,
    response_channel: oneshot::Sender<TicketResult<Response>>,
}

/// Unpack `result`, panicking on answers that do not fit the request
fn answer<T>(
    kind: RequestKind,
    result: TicketResult<Response>,
    pick: impl FnOnce(Response) -> std::result::Result<T, Response>,
) -> ApiResult<T> {
    match result {
        Ok(response) => match pick(response) {
            Ok(value) => Ok(value),
            Err(resp) => panic!("{kind:?} must not be answered by {resp:?}"),
        },
        Err(err) => Err(err.into()),
    }
}

pub struct Api {
    /// One channel per worker thread
    channels: Arc<Vec<Sender<RequestMsg>>>,

    my_channel: Sender<RequestMsg>,
    my_index: usize,
}

impl Api {
    fn new(channels: Vec<Sender<RequestMsg>>) -> Self {
        let my_channel = channels[0].clone();
        Self {
            channels: Arc::new(channels),
            my_channel,
            my_index: 0,
        }
    }
}

impl Clone for Api {
    fn clone(&self) -> Self {
        let my_index = (self.my_index + 1) % self.channels.len();
        Self {
            channels: self.channels.clone(),
            my_channel: self.channels[my_index].clone(),
            my_index,
        }
    }
}

impl Api {
    async fn make_request(&self, request: Request) -> Result<TicketResult<Response>> {
        let (sender, receiver) = oneshot::channel();
        let msg = RequestMsg {
            request,
            response_channel: sender,
        };
        self.my_channel.send_async(msg).await?;
        Ok(receiver.await?)
    }

    pub async fn create_ticket(&self, ticket_id: Option<&str>) -> Result<ApiResult<Ticket>> {
        let request = Request::CreateTicket {
            ticket_id: ticket_id.map(str::to_owned),
        };
        let kind = request.kind();
        let response = self.make_request(request).await?;
        Ok(answer(kind, response, |resp| match resp {
            Response::Ticket(ticket) => Ok(ticket),
            resp => Err(resp),
        }))
    }

    pub async fn list_tickets(&self) -> Result<ApiResult<Vec<Ticket>>> {
        let response = self.make_request(Request::ListTickets).await?;
        Ok(answer(RequestKind::ListTickets, response, |resp| match resp {
            Response::Tickets(tickets) => Ok(tickets),
            resp => Err(resp),
        }))
    }

    pub async fn get_ticket(&self, ticket_id: &str) -> Result<ApiResult<Ticket>> {
        let request = Request::GetTicket {
            ticket_id: ticket_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::GetTicket, response, |resp| match resp {
            Response::Ticket(ticket) => Ok(ticket),
            resp => Err(resp),
        }))
    }

    pub async fn reserve_ticket(
        &self,
        ticket_id: &str,
        user_id: &str,
    ) -> Result<ApiResult<ReserveOutcome>> {
        let request = Request::ReserveTicket {
            ticket_id: ticket_id.to_owned(),
            user_id: user_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::ReserveTicket, response, |resp| match resp {
            Response::Reserve(outcome) => Ok(outcome),
            resp => Err(resp),
        }))
    }

    pub async fn cancel_reservation(
        &self,
        ticket_id: &str,
        user_id: &str,
    ) -> Result<ApiResult<Handoff>> {
        let request = Request::CancelReservation {
            ticket_id: ticket_id.to_owned(),
            user_id: user_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::CancelReservation, response, |resp| match resp {
            Response::Cancelled(handoff) => Ok(handoff),
            resp => Err(resp),
        }))
    }

    pub async fn pay(&self, ticket_id: &str, user_id: &str) -> Result<ApiResult<Ticket>> {
        let request = Request::Pay {
            ticket_id: ticket_id.to_owned(),
            user_id: user_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::Pay, response, |resp| match resp {
            Response::Ticket(ticket) => Ok(ticket),
            resp => Err(resp),
        }))
    }

    pub async fn join_waiting_list(&self, ticket_id: &str, user_id: &str) -> Result<ApiResult<usize>> {
        let request = Request::JoinWaitingList {
            ticket_id: ticket_id.to_owned(),
            user_id: user_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::JoinWaitingList, response, |resp| match resp {
            Response::Position(position) => Ok(position),
            resp => Err(resp),
        }))
    }

    pub async fn leave_waiting_list(&self, ticket_id: &str, user_id: &str) -> Result<ApiResult<()>> {
        let request = Request::LeaveWaitingList {
            ticket_id: ticket_id.to_owned(),
            user_id: user_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::LeaveWaitingList, response, |resp| match resp {
            Response::Left => Ok(()),
            resp => Err(resp),
        }))
    }

    pub async fn waiting_list(&self, ticket_id: &str) -> Result<ApiResult<Vec<WaitingListItem>>> {
        let request = Request::WaitingList {
            ticket_id: ticket_id.to_owned(),
        };
        let response = self.make_request(request).await?;
        Ok(answer(RequestKind::WaitingList, response, |resp| match resp {
            Response::WaitingList(items) => Ok(items),
            resp => Err(resp),
        }))
    }

    /// Users of the waiting list in queue order
    pub async fn waiting_users(&self, ticket_id: &str) -> Result<Vec<String>> {
        let items = self.waiting_list(ticket_id).await??;
        Ok(items.into_iter().map(|item| item.user_id).collect())
    }

    pub fn create_user_session(&self) -> UserSession {
        UserSession::with_user_id(self, random_id())
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SessionState {
    None,
    Holding(String),
    Waiting { ticket_id: String, position: usize },
    Bought(String),
}

pub struct UserSession<'a> {
    pub api: &'a Api,
    pub user_id: String,
    pub state: SessionState,
}

impl<'a> UserSession<'a> {
    pub fn with_user_id(api: &'a Api, user_id: impl Into<String>) -> Self {
        UserSession {
            api,
            user_id: user_id.into(),
            state: SessionState::None,
        }
    }

    pub async fn reserve_ticket(&mut self, ticket_id: &str) -> Result<ApiResult<ReserveOutcome>> {
        let response = self.api.reserve_ticket(ticket_id, &self.user_id).await?;
        match &response {
            Ok(ReserveOutcome::Reserved(_)) => {
                self.state = SessionState::Holding(ticket_id.to_owned());
            }
            Ok(ReserveOutcome::Queued { position }) => {
                self.state = SessionState::Waiting {
                    ticket_id: ticket_id.to_owned(),
                    position: *position,
                };
            }
            Err(_) => {}
        }
        Ok(response)
    }

    pub async fn pay(&mut self, ticket_id: &str) -> Result<ApiResult<Ticket>> {
        let response = self.api.pay(ticket_id, &self.user_id).await?;
        if response.is_ok() {
            self.state = SessionState::Bought(ticket_id.to_owned());
        }
        Ok(response)
    }

    pub async fn cancel_reservation(&mut self, ticket_id: &str) -> Result<ApiResult<Handoff>> {
        let response = self.api.cancel_reservation(ticket_id, &self.user_id).await?;
        if response.is_ok() {
            self.state = SessionState::None;
        }
        Ok(response)
    }

    pub async fn join_waiting_list(&mut self, ticket_id: &str) -> Result<ApiResult<usize>> {
        let response = self.api.join_waiting_list(ticket_id, &self.user_id).await?;
        if let Ok(position) = &response {
            self.state = SessionState::Waiting {
                ticket_id: ticket_id.to_owned(),
                position: *position,
            };
        }
        Ok(response)
    }

    pub async fn leave_waiting_list(&mut self, ticket_id: &str) -> Result<ApiResult<()>> {
        let response = self.api.leave_waiting_list(ticket_id, &self.user_id).await?;
        if response.is_ok() {
            self.state = SessionState::None;
        }
        Ok(response)
    }
}

/// Random id usable as a user or ticket id
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    nanorand::tls_rng().fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}
