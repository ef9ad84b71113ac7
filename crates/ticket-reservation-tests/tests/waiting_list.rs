use std::time::Duration;

use eyre::Result;
use ticket_reservation_core::{ErrorKind, Handoff, NotificationKind, TicketStatus};
use ticket_reservation_tests::{next_notification, TestCtxBuilder};

mod util;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_fifo_positions() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];

    util::reserve(&ctx, ticket_id, "A").await?;
    assert_eq!(util::queue(&ctx, ticket_id, "B").await?, 1);
    assert_eq!(util::queue(&ctx, ticket_id, "C").await?, 2);
    assert_eq!(ctx.api.join_waiting_list(ticket_id, "D").await??, 3);

    let list = ctx.api.waiting_list(ticket_id).await??;
    let entries: Vec<_> = list
        .iter()
        .map(|item| (item.user_id.as_str(), item.position))
        .collect();
    assert_eq!(entries, [("B", 1), ("C", 2), ("D", 3)]);
    assert!(list.windows(2).all(|w| w[0].added_at <= w[1].added_at));

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_cancel_promotes_head() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];
    let b_notifications = ctx.connect("B");

    util::reserve(&ctx, ticket_id, "A").await?;
    util::queue(&ctx, ticket_id, "B").await?;
    util::queue(&ctx, ticket_id, "C").await?;

    let wrong = ctx.api.cancel_reservation(ticket_id, "C").await?;
    assert_eq!(wrong.unwrap_err().kind, ErrorKind::InvalidState);

    match ctx.api.cancel_reservation(ticket_id, "A").await?? {
        Handoff::Promoted(next) => assert_eq!(next.user_id, "B"),
        other => panic!("The head of the waiting list must be promoted, got {other:?}."),
    }

    let ticket = ctx.api.get_ticket(ticket_id).await??;
    assert_eq!(ticket.status, TicketStatus::Reserved);
    assert_eq!(ticket.reserved_by.as_deref(), Some("B"));
    assert!(ticket.expires_at.is_some());
    assert_eq!(ctx.api.waiting_users(ticket_id).await?, ["C"]);

    let notification = next_notification(&b_notifications, WAIT).await?;
    assert_eq!(notification.kind, NotificationKind::TicketAvailable);
    assert_eq!(notification.get("ticket_id"), Some(ticket_id.as_str()));
    assert_eq!(notification.get("user_id"), Some("B"));

    // B now holds the ticket and may pay
    let paid = ctx.api.pay(ticket_id, "B").await??;
    assert_eq!(paid.status, TicketStatus::Paid);

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_cancel_without_waiters_is_silent() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];
    let a_notifications = ctx.connect("A");

    util::reserve(&ctx, ticket_id, "A").await?;
    assert_eq!(
        ctx.api.cancel_reservation(ticket_id, "A").await??,
        Handoff::Released
    );

    let ticket = ctx.api.get_ticket(ticket_id).await??;
    assert_eq!(ticket.status, TicketStatus::Available);
    assert_eq!(ticket.reserved_by, None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(a_notifications.is_empty(), "Cancelling must not notify anybody.");

    // the ticket can be reserved again right away
    util::reserve(&ctx, ticket_id, "B").await?;

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_leave_and_duplicates() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];

    util::reserve(&ctx, ticket_id, "A").await?;
    util::queue(&ctx, ticket_id, "B").await?;
    util::queue(&ctx, ticket_id, "C").await?;
    // joining twice keeps both entries
    assert_eq!(util::queue(&ctx, ticket_id, "B").await?, 3);
    assert_eq!(ctx.api.waiting_users(ticket_id).await?, ["B", "C", "B"]);

    ctx.api.leave_waiting_list(ticket_id, "B").await??;
    assert_eq!(ctx.api.waiting_users(ticket_id).await?, ["C", "B"]);

    ctx.api.leave_waiting_list(ticket_id, "C").await??;
    ctx.api.leave_waiting_list(ticket_id, "B").await??;
    let missing = ctx.api.leave_waiting_list(ticket_id, "B").await?;
    assert_eq!(missing.unwrap_err().kind, ErrorKind::NotFound);

    // with nobody left, cancelling frees the ticket
    assert_eq!(
        ctx.api.cancel_reservation(ticket_id, "A").await??,
        Handoff::Released
    );

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_join_rules() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];

    let missing = ctx.api.join_waiting_list("no-such-ticket", "A").await?;
    assert_eq!(missing.unwrap_err().kind, ErrorKind::NotFound);

    util::reserve(&ctx, ticket_id, "A").await?;
    ctx.api.pay(ticket_id, "A").await??;
    let sold = ctx.api.join_waiting_list(ticket_id, "B").await?;
    assert_eq!(sold.unwrap_err().kind, ErrorKind::AlreadyPaid);

    ctx.finish().await
}
