use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use tokio::fs::{self, OpenOptions};
use tracing::{debug, info, warn};

use crate::config::{BinkConfig, RECEIVE_DIR};
use crate::storage::{OutboundFile, PartialFile, SpoolStorage};

/// Spool kept in one directory per network.
pub struct LocalSpool {
    networks: HashMap<String, PathBuf>,
}

impl LocalSpool {
    pub fn new(networks: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            networks: networks
                .into_iter()
                .map(|(name, dir)| (name.to_lowercase(), dir))
                .collect(),
        }
    }

    pub fn from_config(config: &BinkConfig) -> Self {
        Self::new(
            config
                .networks
                .iter()
                .map(|n| (n.name.clone(), n.directory.clone())),
        )
    }

    fn network_dir(&self, network: &str) -> anyhow::Result<&PathBuf> {
        self.networks
            .get(&network.to_lowercase())
            .ok_or_else(|| anyhow!("unknown network: {}", network))
    }

    fn receive_dir(&self, network: &str) -> anyhow::Result<PathBuf> {
        Ok(self.network_dir(network)?.join(RECEIVE_DIR))
    }
}

/// Names announced by a peer must be plain file names.
fn check_inbound_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        bail!("refusing inbound file name '{}'", name);
    }
    Ok(())
}

/// `s<node>.net` packets are renamed to `p<k>-0-<i>.net` on arrival.
fn pending_prefix(name: &str) -> Option<&'static str> {
    let digits = name.strip_prefix('s')?.strip_suffix(".net")?;
    let node: u32 = digits.parse().ok()?;
    Some(if node != 0 { "1" } else { "0" })
}

/// Claim `target` by creating it exclusively; `false` when another writer
/// already holds the name.
async fn claim(target: &Path) -> anyhow::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(target).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn unix_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl SpoolStorage for LocalSpool {
    async fn outbound_for(
        &self,
        network: &str,
        node: u16,
    ) -> anyhow::Result<Vec<OutboundFile>> {
        let name = format!("s{}.net", node);
        let path = self.network_dir(network)?.join(&name);
        let meta = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return Ok(Vec::new()),
        };
        debug!("outbound file for node {}: {:?}", node, path);
        Ok(vec![OutboundFile {
            name,
            size: meta.len(),
            timestamp: unix_mtime(&meta),
            path,
        }])
    }

    async fn open_outbound(
        &self,
        file: &OutboundFile,
    ) -> anyhow::Result<fs::File> {
        Ok(fs::File::open(&file.path).await?)
    }

    async fn delete_outbound(
        &self,
        file: &OutboundFile,
    ) -> anyhow::Result<()> {
        fs::remove_file(&file.path).await?;
        Ok(())
    }

    async fn create_inbound(
        &self,
        network: &str,
        name: &str,
    ) -> anyhow::Result<PartialFile> {
        check_inbound_name(name)?;
        let dir = self.receive_dir(network)?;
        fs::create_dir_all(&dir).await?;
        // Every peer names its packet after us, so each receiver gets its own file.
        for _ in 0..16 {
            let path = dir.join(format!("{}.{:08x}", name, rand::random::<u32>()));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok(PartialFile { path, file }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        bail!("no free partial file name for {}", name)
    }

    async fn accept_inbound(
        &self,
        network: &str,
        partial: &Path,
        name: &str,
    ) -> anyhow::Result<PathBuf> {
        check_inbound_name(name)?;
        let dir = self.network_dir(network)?;

        let Some(prefix) = pending_prefix(name) else {
            let target = dir.join(name);
            fs::rename(partial, &target).await?;
            return Ok(target);
        };

        for i in 0..1000 {
            let target = dir.join(format!("p{}-0-{}.net", prefix, i));
            if !claim(&target).await? {
                continue;
            }
            if let Err(e) = fs::rename(partial, &target).await {
                let _ = fs::remove_file(&target).await;
                return Err(e.into());
            }
            info!("renamed {} to {:?}", name, target);
            return Ok(target);
        }
        bail!("no free pending file name for {}", name)
    }

    async fn discard_inbound(
        &self,
        partial: &Path,
    ) -> anyhow::Result<()> {
        match fs::remove_file(partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_partials(
        &self,
        network: &str,
    ) -> anyhow::Result<usize> {
        let dir = self.receive_dir(network)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("unable to remove partial file {:?}: {}", entry.path(), e),
                }
            }
        }
        Ok(removed)
    }
}
