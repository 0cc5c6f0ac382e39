use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// A packet queued for delivery to a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, unix seconds
    pub timestamp: i64,
}

/// An inbound file being written in the receive directory.
#[derive(Debug)]
pub struct PartialFile {
    pub path: PathBuf,
    pub file: tokio::fs::File,
}

#[async_trait]
pub trait SpoolStorage: Send + Sync {
    /// Files queued for `node` on `network`.
    async fn outbound_for(
        &self,
        network: &str,
        node: u16,
    ) -> anyhow::Result<Vec<OutboundFile>>;

    async fn open_outbound(
        &self,
        file: &OutboundFile,
    ) -> anyhow::Result<tokio::fs::File>;

    /// Remove a file once the peer acknowledged it.
    async fn delete_outbound(
        &self,
        file: &OutboundFile,
    ) -> anyhow::Result<()>;

    /// Create a fresh partial file for an inbound transfer, private to the caller.
    async fn create_inbound(
        &self,
        network: &str,
        name: &str,
    ) -> anyhow::Result<PartialFile>;

    /// Make a completed inbound file visible in the network directory.
    async fn accept_inbound(
        &self,
        network: &str,
        partial: &Path,
        name: &str,
    ) -> anyhow::Result<PathBuf>;

    /// Remove the partial file of an interrupted transfer.
    async fn discard_inbound(
        &self,
        partial: &Path,
    ) -> anyhow::Result<()>;

    /// Remove leftovers of transfers that never completed.
    async fn discard_partials(
        &self,
        network: &str,
    ) -> anyhow::Result<usize>;

    async fn bytes_waiting(
        &self,
        network: &str,
        node: u16,
    ) -> anyhow::Result<u64> {
        Ok(self
            .outbound_for(network, node)
            .await?
            .iter()
            .map(|f| f.size)
            .sum())
    }
}
