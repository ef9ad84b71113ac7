use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use tempfile::TempDir;
use ticket_reservation_core::{Config, Notification};
use ticket_reservation_engine::{NotificationDispatcher, Store, TicketService};
use tracing_subscriber::EnvFilter;

mod api;
pub use api::{random_id, Api, ApiError, ApiResult, SessionState, UserSession};

pub struct TestCtxBuilder {
    /// Number of tickets created before the test starts
    pub tickets: u64,
    /// Count of request threads
    pub worker_threads: u16,
    /// Engine configuration; the transaction log is placed in a scratch
    /// directory on build
    pub config: Config,
}

impl TestCtxBuilder {
    /// Create a new test context builder initialized with environment defaults
    ///
    /// Timings are shortened so that background work completes quickly.
    pub fn from_env() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let config = Config::from_env()
            .with_settlement_delay(Duration::from_millis(20))
            .with_reaper_interval(Duration::from_millis(50));
        Ok(TestCtxBuilder {
            tickets: 0,
            worker_threads: 2,
            config,
        })
    }

    /// Set the number of tickets created up front
    pub fn with_tickets(mut self, tickets: u64) -> Self {
        self.tickets = tickets;
        self
    }

    /// Set the number of request threads to use
    pub fn with_worker_threads(mut self, threads: u16) -> Self {
        assert_ne!(threads, 0);
        self.worker_threads = threads;
        self
    }

    /// Set the reservation hold window
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.config = self.config.with_reservation_ttl(ttl);
        self
    }

    /// Set the simulated settlement latency
    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_settlement_delay(delay);
        self
    }

    /// Build the test context
    pub async fn build(self) -> Result<TestCtx> {
        let dir = tempfile::tempdir()?;
        let config = self
            .config
            .with_transaction_log(dir.path().join("transactions.log"));
        let (engine, api) = api::mock::start(self.worker_threads, config.clone()).await?;

        let mut tickets = Vec::with_capacity(self.tickets as usize);
        for i in 0..self.tickets {
            let ticket = api.create_ticket(Some(format!("ticket-{i}").as_str())).await??;
            tickets.push(ticket.id);
        }

        Ok(TestCtx {
            api,
            engine,
            tickets,
            config,
            dir,
            drop_bomb: DropBomb,
        })
    }
}

/// Test context
pub struct TestCtx {
    /// API allowing to interact with the reservation engine
    pub api: Api,
    engine: api::mock::MockEngine,
    /// Ids of the tickets created up front
    pub tickets: Vec<String>,
    /// Configuration the engine was launched with
    pub config: Config,
    dir: TempDir,

    drop_bomb: DropBomb,
}

impl TestCtx {
    /// Open a notification channel for `user_id`
    pub fn connect(&self, user_id: &str) -> flume::Receiver<Notification> {
        self.dispatcher().connect(user_id)
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        self.engine.engine().dispatcher()
    }

    pub fn service(&self) -> &TicketService {
        self.engine.engine().service()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.engine.engine().store()
    }

    pub fn transaction_log(&self) -> PathBuf {
        self.dir.path().join("transactions.log")
    }

    /// Lines of the transaction log written so far
    pub fn transaction_log_lines(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(self.transaction_log())?;
        Ok(content.lines().map(str::to_owned).collect())
    }

    /// Shut down the reservation engine and finish the test
    pub async fn finish(self) -> Result<()> {
        std::mem::forget(self.drop_bomb);
        drop(self.api);
        self.engine.shutdown().await?;
        drop(self.dir);
        Ok(())
    }
}

/// Wait for the next notification on `receiver`
pub async fn next_notification(
    receiver: &flume::Receiver<Notification>,
    timeout: Duration,
) -> Result<Notification> {
    match tokio::time::timeout(timeout, receiver.recv_async()).await {
        Ok(notification) => Ok(notification?),
        Err(_) => Err(eyre!("no notification within {timeout:?}")),
    }
}

struct DropBomb;

impl Drop for DropBomb {
    fn drop(&mut self) {
        eprintln!("@TestAuthor: You should call `ctx.finish().await` to shut the reservation engine down");
    }
}
