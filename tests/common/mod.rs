#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use binkpd::callout::CalloutConfig;
use binkpd::config::{BinkConfig, NetworkConfig};
use binkpd::protocol::frame::{read_frame, write_command, write_data};
use binkpd::protocol::{Command, Frame};
use binkpd::session::SessionTimings;
use binkpd::transport::{Connection, StreamConnection, TransportError};
use tokio::io::DuplexStream;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("binkpd=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Same retry budgets as production, shorter intervals.
pub fn fast_timings() -> SessionTimings {
    SessionTimings {
        conn_init: ms(200),
        brief: ms(20),
        settle: ms(50),
        settle_rounds: 2,
        announce: ms(50),
        chunk: ms(10),
        poll: ms(100),
        eob_poll: ms(200),
        fatal: ms(100),
        body: ms(2000),
        ..SessionTimings::default()
    }
}

/// A system that is `node` on wwivnet and knows `peer` with `password`.
pub fn node_config(dir: &Path, node: u16, peer: u16, password: &str) -> BinkConfig {
    BinkConfig {
        system_name: format!("Test BBS {}", node),
        sysop_name: "Sysop".to_string(),
        listen_address: "127.0.0.1:0".to_string(),
        data_directory: dir.to_path_buf(),
        auto_create_directories: true,
        crc: false,
        cram_md5: false,
        networks: vec![NetworkConfig {
            name: "wwivnet".to_string(),
            node,
            directory: dir.join("wwivnet"),
            callouts: vec![CalloutConfig {
                node: peer,
                password: password.to_string(),
                ..CalloutConfig::default()
            }],
        }],
    }
}

pub fn net_dir(dir: &Path) -> std::path::PathBuf {
    dir.join("wwivnet")
}

/// Scripted BinkP peer driven through the crate's own frame codec.
pub struct MockPeer {
    pub conn: StreamConnection<DuplexStream>,
}

impl MockPeer {
    pub fn new(stream: DuplexStream) -> Self {
        Self { conn: StreamConnection::new(stream, "mock") }
    }

    pub async fn send(&mut self, command: Command) {
        write_command(&mut self.conn, &command).await.unwrap();
    }

    pub async fn send_data(&mut self, data: &[u8]) {
        write_data(&mut self.conn, data).await.unwrap();
    }

    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        read_frame(&mut self.conn, Duration::from_secs(10), Duration::from_secs(5)).await
    }

    /// Read frames until a command matches, returning everything seen.
    pub async fn recv_until(&mut self, mut done: impl FnMut(&Command) -> bool) -> Vec<Frame> {
        let mut seen = Vec::new();
        loop {
            let frame = self.recv().await.unwrap();
            let matched = matches!(&frame, Frame::Command(c) if done(c));
            seen.push(frame);
            if matched {
                return seen;
            }
        }
    }

    /// Greet as `node` on wwivnet.
    pub async fn greet(&mut self, node: u16) {
        self.send(Command::Nul("SYS Mock BBS".into())).await;
        self.send(Command::Nul("VER mock/1.0 binkp/1.0".into())).await;
        self.send(Command::Adr(format!("20000:20000/{}@wwivnet", node))).await;
    }

    /// Wait for the other side to hang up.
    pub async fn wait_closed(&mut self) {
        loop {
            match self.recv().await {
                Ok(_) => continue,
                Err(TransportError::Closed) => return,
                Err(e) => panic!("unexpected transport error: {}", e),
            }
        }
    }

    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}

pub fn commands(frames: &[Frame]) -> Vec<&Command> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Command(c) => Some(c),
            Frame::Data(_) => None,
        })
        .collect()
}

pub fn data_sizes(frames: &[Frame]) -> Vec<usize> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data(d) => Some(d.len()),
            Frame::Command(_) => None,
        })
        .collect()
}
