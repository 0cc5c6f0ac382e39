//! Bookkeeping for files moving through a session: outbound files stay
//! tracked until the peer acknowledges them, and at most one inbound file is
//! open at a time.

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::protocol::handshake::{AckLine, FileLine};
use crate::protocol::MAX_DATA_CHUNK;
use crate::storage::{OutboundFile, PartialFile, SpoolStorage};
use crate::utils::crc::crc32_file;

/// An outbound file that was announced and not yet acknowledged.
#[derive(Debug)]
pub struct OutboundTransfer {
    pub file: OutboundFile,
    pub crc: Option<u32>,
    handle: tokio::fs::File,
}

#[derive(Debug)]
struct InboundTransfer {
    line: FileLine,
    partial: PartialFile,
    received: u64,
}

/// A file received completely during this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub path: PathBuf,
    pub length: u64,
}

pub struct TransferManager<S: SpoolStorage> {
    storage: Arc<S>,
    network: Option<String>,
    crc: bool,
    outbound: HashMap<String, OutboundTransfer>,
    inbound: Option<InboundTransfer>,
    received: Vec<ReceivedFile>,
    resend_queue: VecDeque<String>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl<S: SpoolStorage> TransferManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            network: None,
            crc: false,
            outbound: HashMap::new(),
            inbound: None,
            received: Vec::new(),
            resend_queue: VecDeque::new(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Network whose directory receives inbound files.
    pub fn set_network(&mut self, network: impl Into<String>) {
        self.network = Some(network.into());
    }

    pub fn set_crc(&mut self, crc: bool) {
        self.crc = crc;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn in_flight(&self) -> usize {
        self.outbound.len()
    }

    pub fn received_files(&self) -> &[ReceivedFile] {
        &self.received
    }

    /// Open `file` and track it; returns the `M_FILE` line announcing it.
    pub async fn start_outbound(&mut self, file: OutboundFile) -> Result<FileLine> {
        let handle = self.storage.open_outbound(&file).await?;
        let crc = if self.crc {
            Some(crc32_file(&file.path).await?)
        } else {
            None
        };
        let line = FileLine {
            name: file.name.clone(),
            length: file.size,
            timestamp: file.timestamp,
            offset: 0,
            crc,
        };
        info!("       sending file: {} ({} bytes)", file.name, file.size);
        self.outbound
            .insert(file.name.clone(), OutboundTransfer { file, crc, handle });
        Ok(line)
    }

    /// Next chunk of an outbound file. `None` once the file is no longer in
    /// flight; an empty chunk at end of file.
    pub async fn read_chunk(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(transfer) = self.outbound.get_mut(name) else {
            return Ok(None);
        };
        let mut chunk = vec![0u8; MAX_DATA_CHUNK];
        let mut filled = 0;
        while filled < chunk.len() {
            let n = transfer.handle.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }

    /// The peer confirmed receipt: forget the file and delete it from the spool.
    pub async fn handle_got(&mut self, ack: &AckLine) -> Result<bool> {
        let Some(transfer) = self.outbound.remove(&ack.name) else {
            warn!("M_GOT for unknown file: {}", ack.name);
            return Ok(false);
        };
        if ack.length != transfer.file.size {
            warn!(
                "M_GOT length mismatch for {}: sent {}, peer has {}",
                ack.name, transfer.file.size, ack.length
            );
        }
        drop(transfer.handle);
        if let Err(e) = self.storage.delete_outbound(&transfer.file).await {
            error!("unable to delete sent file {:?}: {}", transfer.file.path, e);
        }
        self.bytes_sent += transfer.file.size;
        info!("       file {} acknowledged by peer", ack.name);
        Ok(true)
    }

    /// The peer declined the file; it stays queued for a later session.
    pub fn handle_skip(&mut self, ack: &AckLine) -> bool {
        match self.outbound.remove(&ack.name) {
            Some(_) => {
                info!("       peer skipped {}, leaving it queued", ack.name);
                true
            }
            None => {
                warn!("M_SKIP for unknown file: {}", ack.name);
                false
            }
        }
    }

    /// Queue a full re-send of an in-flight file.
    pub fn request_resend(&mut self, line: &FileLine) -> bool {
        if !self.outbound.contains_key(&line.name) {
            warn!("M_GET for file not in flight: {}", line.name);
            return false;
        }
        if line.offset != 0 {
            warn!("M_GET for {} at offset {}, sending from the start", line.name, line.offset);
        }
        if !self.resend_queue.contains(&line.name) {
            self.resend_queue.push_back(line.name.clone());
        }
        true
    }

    /// Rewind the next requested file; returns its announcement line.
    pub async fn next_resend(&mut self) -> Result<Option<FileLine>> {
        while let Some(name) = self.resend_queue.pop_front() {
            let Some(transfer) = self.outbound.get_mut(&name) else {
                continue;
            };
            transfer.handle.seek(SeekFrom::Start(0)).await?;
            return Ok(Some(FileLine {
                name: transfer.file.name.clone(),
                length: transfer.file.size,
                timestamp: transfer.file.timestamp,
                offset: 0,
                crc: transfer.crc,
            }));
        }
        Ok(None)
    }

    /// Open a receiver for an announced inbound file. A zero length file is
    /// complete immediately and yields its acknowledgement.
    pub async fn begin_receive(&mut self, line: FileLine) -> Result<Option<AckLine>> {
        let Some(network) = self.network.clone() else {
            warn!("M_FILE before the network is known, ignoring {}", line.name);
            return Ok(None);
        };
        if let Some(previous) = self.inbound.take() {
            warn!(
                "new M_FILE {} while {} incomplete ({} of {} bytes)",
                line.name, previous.line.name, previous.received, previous.line.length
            );
            self.discard(previous).await;
        }
        if line.offset != 0 {
            warn!("M_FILE {} at offset {}, receiving from the start", line.name, line.offset);
        }
        let partial = self.storage.create_inbound(&network, &line.name).await?;
        info!("       receiving file: {} ({} bytes)", line.name, line.length);
        self.inbound = Some(InboundTransfer { line, partial, received: 0 });
        if self.inbound.as_ref().is_some_and(|i| i.line.length == 0) {
            return self.finish_receive().await;
        }
        Ok(None)
    }

    /// Append a data frame to the inbound file; yields the `M_GOT` line when
    /// the declared length has arrived.
    pub async fn receive_data(&mut self, data: &[u8]) -> Result<Option<AckLine>> {
        let Some(inbound) = self.inbound.as_mut() else {
            warn!("data frame with no file open, dropping {} bytes", data.len());
            return Ok(None);
        };
        inbound.partial.file.write_all(data).await?;
        inbound.received += data.len() as u64;
        debug!(
            "       {}: {} of {} bytes",
            inbound.line.name, inbound.received, inbound.line.length
        );
        if inbound.received >= inbound.line.length {
            return self.finish_receive().await;
        }
        Ok(None)
    }

    async fn finish_receive(&mut self) -> Result<Option<AckLine>> {
        let Some(mut inbound) = self.inbound.take() else {
            return Ok(None);
        };
        let network = self.network.clone().unwrap_or_default();
        inbound.partial.file.flush().await?;
        drop(inbound.partial.file);

        let declared_crc = inbound.line.crc.filter(|c| *c != 0);
        if let (true, Some(expected)) = (self.crc, declared_crc) {
            let actual = crc32_file(&inbound.partial.path).await?;
            if actual != expected {
                error!(
                    "CRC mismatch on {}: declared {:08X}, computed {:08X}",
                    inbound.line.name, expected, actual
                );
            }
        }

        let path = self
            .storage
            .accept_inbound(&network, &inbound.partial.path, &inbound.line.name)
            .await?;
        self.bytes_received += inbound.received;
        info!("       received {} into {:?}", inbound.line.name, path);
        self.received.push(ReceivedFile {
            name: inbound.line.name.clone(),
            path,
            length: inbound.received,
        });

        Ok(Some(AckLine {
            name: inbound.line.name,
            length: inbound.received,
            timestamp: Some(inbound.line.timestamp),
            crc: if self.crc { declared_crc } else { None },
        }))
    }

    pub fn has_pending_resend(&self) -> bool {
        !self.resend_queue.is_empty()
    }

    /// Release every open file. Unacknowledged outbound files stay queued and
    /// a partially received file is removed.
    pub async fn abandon(&mut self) {
        self.outbound.clear();
        self.resend_queue.clear();
        if let Some(inbound) = self.inbound.take() {
            info!(
                "       discarding partial file {} ({} of {} bytes)",
                inbound.line.name, inbound.received, inbound.line.length
            );
            self.discard(inbound).await;
        }
    }

    async fn discard(&self, inbound: InboundTransfer) {
        drop(inbound.partial.file);
        if let Err(e) = self.storage.discard_inbound(&inbound.partial.path).await {
            warn!("unable to remove partial file {:?}: {}", inbound.partial.path, e);
        }
    }
}
