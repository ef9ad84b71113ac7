//! Logical key layout in the store

/// Prefix of ticket records
pub const TICKET_PREFIX: &str = "ticket:";
/// Prefix of TTL-bound reservation records
pub const RESERVATION_PREFIX: &str = "reservation:";
/// Prefix of per-ticket waiting lists
pub const WAITING_PREFIX: &str = "waiting:";
/// Prefix of durable payment intents
pub const PAYMENT_PREFIX: &str = "payment:";
/// Set of ticket ids whose payment has not been settled yet
pub const PENDING_PAYMENTS: &str = "payments:pending";
/// Counter numbering transaction log entries
pub const PAYMENT_SEQUENCE: &str = "payments:seq";

/// `ticket:<id>`
pub fn ticket(ticket_id: &str) -> String {
    format!("{TICKET_PREFIX}{ticket_id}")
}

/// `reservation:<id>`
pub fn reservation(ticket_id: &str) -> String {
    format!("{RESERVATION_PREFIX}{ticket_id}")
}

/// `waiting:<id>`
pub fn waiting(ticket_id: &str) -> String {
    format!("{WAITING_PREFIX}{ticket_id}")
}

/// `payment:<id>`
pub fn payment(ticket_id: &str) -> String {
    format!("{PAYMENT_PREFIX}{ticket_id}")
}

/// Strip `prefix` off `key`, yielding the ticket id
pub fn ticket_id<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|id| !id.is_empty())
}
