use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

use crate::callout::kilobytes;
use crate::session::BinkSide;

/// One line of `net.log`, written when a session ends.
#[derive(Debug, Clone)]
pub struct NetLogEntry {
    pub started: DateTime<Local>,
    pub side: BinkSide,
    pub node: u16,
    pub network: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub elapsed: Duration,
    pub success: bool,
}

impl NetLogEntry {
    pub fn to_line(&self) -> String {
        let direction = match self.side {
            BinkSide::Originating => "To",
            BinkSide::Answering => "Fr",
        };
        let mut line = format!(
            "{} {} {} S:{}k R:{}k {}s {}",
            self.started.format("%Y-%m-%d %H:%M:%S"),
            direction,
            self.node,
            kilobytes(self.bytes_sent),
            kilobytes(self.bytes_received),
            self.elapsed.as_secs(),
            self.network
        );
        if !self.success {
            line.push_str(" FAILED");
        }
        line
    }
}

pub async fn append(path: impl AsRef<Path>, entry: &NetLogEntry) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", entry.to_line()).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
