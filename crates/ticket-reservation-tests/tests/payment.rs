use std::time::Duration;

use eyre::Result;
use ticket_reservation_core::{channels, NotificationKind, PaymentSuccess};
use ticket_reservation_engine::repository::PaymentStatus;
use ticket_reservation_tests::{next_notification, TestCtxBuilder};

mod util;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_payment_is_settled_and_logged() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?.with_tickets(1).build().await?;
    let ticket_id = &ctx.tickets[0];
    let successes = ctx.store().subscribe(channels::PAYMENT_SUCCESS)?;
    let notifications = ctx.connect("alice");

    util::reserve(&ctx, ticket_id, "alice").await?;
    ctx.api.pay(ticket_id, "alice").await??;

    let notification = next_notification(&notifications, WAIT).await?;
    assert_eq!(notification.kind, NotificationKind::PaymentSuccess);
    assert_eq!(notification.get("ticket_id"), Some(ticket_id.as_str()));
    assert!(notification.get("timestamp").is_some());

    let event = successes.try_recv().expect("payment_success must be published before notifying");
    let success: PaymentSuccess = serde_json::from_str(&event.payload)?;
    assert_eq!(success.ticket_id, *ticket_id);
    assert_eq!(success.user_id, "alice");

    let lines = ctx.transaction_log_lines()?;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with(&format!("1 ticket_id={ticket_id} user_id=alice timestamp=")));
    assert_eq!(
        ctx.service().payment_status(ticket_id)?,
        Some(PaymentStatus::Settled)
    );

    ctx.finish().await
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn test_settlements_are_sequenced() -> Result<()> {
    let ctx = TestCtxBuilder::from_env()?
        .with_tickets(3)
        .with_settlement_delay(Duration::from_millis(5))
        .build()
        .await?;

    let mut receivers = Vec::new();
    for (i, ticket_id) in ctx.tickets.iter().enumerate() {
        let user_id = format!("buyer-{i}");
        receivers.push(ctx.connect(&user_id));
        util::reserve(&ctx, ticket_id, &user_id).await?;
        ctx.api.pay(ticket_id, &user_id).await??;
    }
    for receiver in &receivers {
        let notification = next_notification(receiver, WAIT).await?;
        assert_eq!(notification.kind, NotificationKind::PaymentSuccess);
    }

    let lines = ctx.transaction_log_lines()?;
    assert_eq!(lines.len(), 3);
    for (i, (line, ticket_id)) in lines.iter().zip(&ctx.tickets).enumerate() {
        let expected = format!("{} ticket_id={ticket_id} user_id=buyer-{i} ", i + 1);
        assert!(line.starts_with(&expected), "unexpected log line {line:?}");
    }

    ctx.finish().await
}
