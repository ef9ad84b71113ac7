//! Mock API implementation directly using the `ticket-reservation-engine` crate

use std::sync::Arc;

use eyre::{eyre, Result};
use ticket_reservation_core::{Config, RequestHandler};
use ticket_reservation_engine::{Engine, MemoryStore, Store};
use tokio::task::{self, JoinHandle};

use super::{Api, RequestMsg};

pub struct MockEngine {
    engine: Arc<Engine>,
    join_handles: Vec<JoinHandle<()>>,
}

pub async fn start(threads: u16, config: Config) -> Result<(MockEngine, Api)> {
    let engine = task::spawn_blocking(move || {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        ticket_reservation_engine::launch(&config, store)
    })
    .await??;
    let engine = Arc::new(engine);

    let it = (0..threads).map(|_| {
        let (sender, receiver) = flume::bounded::<RequestMsg>(65536);
        let engine = engine.clone();
        let handle = task::spawn_blocking(move || {
            let engine = &*engine;
            for msg in receiver.into_iter() {
                // the caller may have given up waiting
                let _ = msg.response_channel.send(engine.handle(msg.request));
            }
        });
        (sender, handle)
    });
    let (senders, join_handles) = it.unzip();

    let mock_engine = MockEngine {
        engine,
        join_handles,
    };
    Ok((mock_engine, Api::new(senders)))
}

impl MockEngine {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn shutdown(self) -> Result<()> {
        for handle in self.join_handles {
            handle.await?;
        }
        let engine = Arc::into_inner(self.engine)
            .ok_or_else(|| eyre!("engine is still referenced after the request threads ended"))?;
        task::spawn_blocking(move || engine.shutdown()).await?;
        Ok(())
    }
}
