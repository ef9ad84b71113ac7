use std::time::Duration;

use eyre::{eyre, Result};
use ticket_reservation_core::{ReserveOutcome, Ticket, TicketStatus};
use ticket_reservation_tests::TestCtx;

/// Reserves `ticket_id` for `user_id` and checks that the reservation was granted.
#[allow(unused)]
pub async fn reserve(ctx: &TestCtx, ticket_id: &str, user_id: &str) -> Result<Ticket> {
    match ctx.api.reserve_ticket(ticket_id, user_id).await?? {
        ReserveOutcome::Reserved(ticket) => {
            assert_eq!(ticket.reserved_by.as_deref(), Some(user_id));
            Ok(ticket)
        }
        ReserveOutcome::Queued { position } => Err(eyre!(
            "{user_id} was queued at {position} on {ticket_id} but should hold it"
        )),
    }
}

/// Queues `user_id` on a held ticket and returns the position.
#[allow(unused)]
pub async fn queue(ctx: &TestCtx, ticket_id: &str, user_id: &str) -> Result<usize> {
    match ctx.api.reserve_ticket(ticket_id, user_id).await?? {
        ReserveOutcome::Queued { position } => Ok(position),
        ReserveOutcome::Reserved(_) => Err(eyre!(
            "{user_id} got {ticket_id} although it should have been held"
        )),
    }
}

/// Polls `ticket_id` until `check` holds or `timeout` passes.
#[allow(unused)]
pub async fn wait_for_ticket(
    ctx: &TestCtx,
    ticket_id: &str,
    timeout: Duration,
    check: impl Fn(&Ticket) -> bool,
) -> Result<Ticket> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let ticket = ctx.api.get_ticket(ticket_id).await??;
        if check(&ticket) {
            return Ok(ticket);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(eyre!("{ticket_id} did not reach the expected state: {ticket:?}"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Whether `ticket` is held by `user_id`.
#[allow(unused)]
pub fn held_by(user_id: &str) -> impl Fn(&Ticket) -> bool + '_ {
    move |ticket| ticket.status == TicketStatus::Reserved && ticket.reserved_by.as_deref() == Some(user_id)
}
