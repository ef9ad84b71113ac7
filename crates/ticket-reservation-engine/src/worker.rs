//! Handles of the long-lived background threads

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{error, info};

/// A named background thread that stops when told to
pub struct Worker {
    name: String,
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Spawn `body`, handing it the receiving end of the shutdown signal
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (shutdown, shutdown_receiver) = bounded(1);
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(shutdown_receiver))?;
        info!(worker = name, "started");
        Ok(Self {
            name: name.to_owned(),
            shutdown,
            thread,
        })
    }

    /// Signal the thread and wait for it to finish
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            error!(worker = %self.name, "panicked");
        } else {
            info!(worker = %self.name, "stopped");
        }
    }
}
