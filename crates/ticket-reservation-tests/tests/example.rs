use eyre::Result;
use ticket_reservation_core::{ReserveOutcome, TicketStatus};
use ticket_reservation_tests::{SessionState, TestCtxBuilder};

mod util;

#[tokio::test] // Every test function needs to be decorated with this attribute
#[ntest::timeout(20_000)] // Test timeout in ms
async fn test_example() -> Result<()> {
    // Create a test context with one ticket
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = ctx.tickets[0].clone();

    // Create a new user session
    let mut session = ctx.api.create_user_session();

    // Reserve and buy the ticket
    match session.reserve_ticket(&ticket_id).await?? {
        ReserveOutcome::Queued { position } => {
            panic!("It must be possible to reserve a free ticket, got position {position}.")
        }
        ReserveOutcome::Reserved(ticket) => {
            assert_eq!(ticket.status, TicketStatus::Reserved);
            assert!(
                session.pay(&ticket_id).await?.is_ok(),
                "It must be possible to pay for the ticket that we just reserved.",
            );
        }
    }
    assert_eq!(session.state, SessionState::Bought(ticket_id.clone()));

    let ticket = ctx.api.get_ticket(&ticket_id).await??;
    assert_eq!(ticket.status, TicketStatus::Paid);
    assert_eq!(ticket.reserved_by.as_deref(), Some(session.user_id.as_str()));
    assert_eq!(ticket.expires_at, None);

    // Finish the test
    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_create_and_list() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(3).build().await?;

    let generated = ctx.api.create_ticket(None).await??;
    assert!(!generated.id.is_empty());
    assert_eq!(generated.status, TicketStatus::Available);

    let duplicate = ctx.api.create_ticket(Some(ctx.tickets[0].as_str())).await?;
    assert!(duplicate.is_err(), "Creating an existing ticket must fail.");

    let mut ids: Vec<_> = ctx
        .api
        .list_tickets()
        .await??
        .into_iter()
        .map(|ticket| ticket.id)
        .collect();
    ids.sort();
    let mut expected = ctx.tickets.clone();
    expected.push(generated.id);
    expected.sort();
    assert_eq!(ids, expected);

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_reads_are_stable() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];

    util::reserve(&ctx, ticket_id, "alice").await?;
    let first = ctx.api.get_ticket(ticket_id).await??;
    let second = ctx.api.get_ticket(ticket_id).await??;
    assert_eq!(first, second, "Reading a ticket must not change it.");

    let missing = ctx.api.get_ticket("no-such-ticket").await?;
    assert_eq!(
        missing.unwrap_err().kind,
        ticket_reservation_core::ErrorKind::NotFound
    );

    ctx.finish().await
}
