use std::collections::BTreeSet;

use eyre::Result;
use futures::future::join_all;
use ticket_reservation_core::{ErrorKind, ReserveOutcome, TicketStatus};
use ticket_reservation_tests::{random_id, TestCtxBuilder};

mod util;

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_exactly_one_reservation_wins() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?
        .with_tickets(1)
        .with_worker_threads(8)
        .build()
        .await?;
    let ticket_id = ctx.tickets[0].clone();

    let users: Vec<String> = (0..50).map(|_| random_id()).collect();
    let requests = users.iter().map(|user_id| {
        let api = ctx.api.clone();
        let ticket_id = ticket_id.clone();
        let user_id = user_id.clone();
        tokio::spawn(async move { api.reserve_ticket(&ticket_id, &user_id).await })
    });

    let mut winners = Vec::new();
    let mut positions = BTreeSet::new();
    for outcome in join_all(requests).await {
        match outcome??? {
            ReserveOutcome::Reserved(ticket) => winners.push(ticket),
            ReserveOutcome::Queued { position } => {
                assert!(positions.insert(position), "Position {position} was handed out twice.");
            }
        }
    }
    assert_eq!(winners.len(), 1, "Exactly one user must get the ticket.");
    assert_eq!(positions, (1..=49).collect::<BTreeSet<_>>());

    let holder = winners[0].reserved_by.clone().unwrap();
    let ticket = ctx.api.get_ticket(&ticket_id).await??;
    assert_eq!(ticket.reserved_by.as_deref(), Some(holder.as_str()));
    let waiting = ctx.api.waiting_users(&ticket_id).await?;
    assert_eq!(waiting.len(), 49);
    assert!(!waiting.contains(&holder));

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_no_double_payment() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?
        .with_tickets(1)
        .with_worker_threads(4)
        .build()
        .await?;
    let ticket_id = ctx.tickets[0].clone();
    util::reserve(&ctx, &ticket_id, "alice").await?;

    let stranger = ctx.api.pay(&ticket_id, "mallory").await?;
    assert_eq!(stranger.unwrap_err().kind, ErrorKind::InvalidState);

    let payments = (0..8).map(|_| {
        let api = ctx.api.clone();
        let ticket_id = ticket_id.clone();
        tokio::spawn(async move { api.pay(&ticket_id, "alice").await })
    });
    let mut paid = 0;
    for result in join_all(payments).await {
        match result?? {
            Ok(ticket) => {
                assert_eq!(ticket.status, TicketStatus::Paid);
                paid += 1;
            }
            Err(err) => assert_eq!(err.kind, ErrorKind::AlreadyPaid),
        }
    }
    assert_eq!(paid, 1, "A ticket must be paid exactly once.");

    let late = ctx.api.reserve_ticket(&ticket_id, "bob").await?;
    assert_eq!(late.unwrap_err().kind, ErrorKind::AlreadyPaid);

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_independent_tickets_do_not_interfere() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?
        .with_tickets(20)
        .with_worker_threads(4)
        .build()
        .await?;

    let requests = ctx.tickets.iter().enumerate().map(|(i, ticket_id)| {
        let api = ctx.api.clone();
        let ticket_id = ticket_id.clone();
        tokio::spawn(async move {
            let user_id = format!("user-{i}");
            let reserved = api.reserve_ticket(&ticket_id, &user_id).await?;
            let paid = api.pay(&ticket_id, &user_id).await?;
            eyre::Ok((reserved, paid))
        })
    });
    for result in join_all(requests).await {
        let (reserved, paid) = result??;
        assert!(matches!(reserved?, ReserveOutcome::Reserved(_)));
        assert_eq!(paid?.status, TicketStatus::Paid);
    }

    let tickets = ctx.api.list_tickets().await??;
    assert!(tickets.iter().all(|ticket| ticket.status == TicketStatus::Paid));

    ctx.finish().await
}
