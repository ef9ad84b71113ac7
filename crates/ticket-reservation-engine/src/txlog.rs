//! Append-only log of settled payments

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use ticket_reservation_core::PaymentIntent;

/// One line per settlement, never rewritten
pub struct TransactionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TransactionLog {
    /// Open (or create) the log at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and sync the entry for a settled `intent`
    ///
    /// Ids are written escaped, so control characters in them can never
    /// break the line.
    pub fn append(&self, sequence: u64, intent: &PaymentIntent, settled_at: DateTime<Utc>) -> io::Result<()> {
        let line = format!(
            "{sequence} ticket_id={} user_id={} timestamp={}\n",
            intent.ticket_id.escape_debug(),
            intent.user_id.escape_debug(),
            settled_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.sync_data()
    }
}
