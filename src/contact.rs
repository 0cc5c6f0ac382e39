//! Persisted per-node contact history, one JSON ledger per network.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coordination::with_lock;

/// Scheduling timestamps are clamped to at most this far in the past.
pub const FIXUP_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Timestamps are unix seconds; 0 means never.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactRecord {
    pub first_contact: i64,
    pub last_contact: i64,
    pub last_contact_sent: i64,
    pub last_attempt: i64,
    pub num_contacts: u32,
    pub num_failures: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_waiting: u64,
}

fn fixup_time(t: i64, now: i64) -> i64 {
    if t > now {
        now
    } else if t < now - FIXUP_WINDOW_SECS {
        now - FIXUP_WINDOW_SECS
    } else {
        t
    }
}

impl ContactRecord {
    fn add_contact(&mut self, time: i64) {
        if self.first_contact == 0 {
            self.first_contact = time;
        }
        self.last_contact = time;
        self.last_attempt = time;
        self.num_contacts += 1;
    }

    /// A session that authenticated and ended cleanly.
    pub fn add_connect(&mut self, time: i64, bytes_sent: u64, bytes_received: u64) {
        self.add_contact(time);
        self.last_contact_sent = time;
        self.bytes_sent += bytes_sent;
        self.bytes_received += bytes_received;
        self.bytes_waiting = self.bytes_waiting.saturating_sub(bytes_sent);
    }

    pub fn add_failure(&mut self, time: i64) {
        self.add_contact(time);
        self.num_failures += 1;
    }

    /// Stamp a dial attempt before it is known how it went.
    pub fn record_attempt(&mut self, time: i64) {
        self.last_attempt = time;
    }

    /// Clamp the scheduling timestamps into `[now - 30 days, now]`.
    pub fn fixup(&mut self, now: i64) {
        self.last_contact = fixup_time(self.last_contact, now);
        self.last_contact_sent = fixup_time(self.last_contact_sent, now);
        self.last_attempt = fixup_time(self.last_attempt, now);
    }
}

#[derive(Debug)]
pub struct ContactLedger {
    path: PathBuf,
    records: BTreeMap<u16, ContactRecord>,
}

impl ContactLedger {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), records: BTreeMap::new() }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let records = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: path.to_path_buf(), records })
    }

    /// Write to a temporary file then rename over the ledger.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, node: u16) -> Option<&ContactRecord> {
        self.records.get(&node)
    }

    /// The record for `node`, created on first reference.
    pub fn record_mut(&mut self, node: u16) -> &mut ContactRecord {
        self.records.entry(node).or_insert_with(|| {
            debug!("creating contact record for node {}", node);
            ContactRecord::default()
        })
    }

    pub fn records(&self) -> impl Iterator<Item = (u16, &ContactRecord)> {
        self.records.iter().map(|(node, rec)| (*node, rec))
    }

    pub fn fixup_all(&mut self, now: i64) {
        for record in self.records.values_mut() {
            record.fixup(now);
        }
    }

    /// Load, modify and save the ledger at `path` under its lock file, so
    /// writers in other tasks or processes are serialized.
    pub fn update<F, R>(path: impl AsRef<Path>, f: F) -> Result<R>
    where
        F: FnOnce(&mut ContactLedger) -> R,
    {
        let path = path.as_ref();
        let lock_path = path.with_extension("lock");
        with_lock(&lock_path, LOCK_TIMEOUT, || {
            let mut ledger = match Self::load(path) {
                Ok(ledger) => ledger,
                Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                    let bad = path.with_extension("json.bad");
                    warn!("Unreadable contact ledger {:?}, moved to {:?}: {}", path, bad, e);
                    std::fs::rename(path, &bad)?;
                    Self::empty(path)
                }
                Err(e) => return Err(e),
            };
            let result = f(&mut ledger);
            ledger.save()?;
            Ok(result)
        })
    }

    /// [`ContactLedger::update`] on the blocking pool.
    pub async fn update_async<F, R>(path: PathBuf, f: F) -> Result<R>
    where
        F: FnOnce(&mut ContactLedger) -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(move || Self::update(path, f)).await?
    }
}
