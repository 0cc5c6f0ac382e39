//! The per-connection BinkP state machine, shared by the answering and the
//! originating side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthType, Cram};
use crate::callout::expected_password_for;
use crate::config::BinkConfig;
use crate::contact::ContactLedger;
use crate::netlog::{self, NetLogEntry};
use crate::protocol::frame::{read_frame, write_command, write_data};
use crate::protocol::handshake::{
    parse_address_list, parse_nul, AckLine, FileLine, Greeting, NulLine, WwivAddress,
};
use crate::protocol::{Command, Frame, CRAM_MD5_PREFIX};
use crate::storage::{OutboundFile, SpoolStorage};
use crate::transfer::TransferManager;
use crate::transport::{Connection, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinkSide {
    Originating,
    Answering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ConnInit,
    WaitConn,
    SendPassword,
    WaitAddr,
    AuthRemote,
    IfSecure,
    WaitPwd,
    PasswordAck,
    WaitOk,
    TransferFiles,
    WaitEob,
    Unknown,
    FatalError,
    Done,
}

/// Wait intervals and retry budgets of the state machine.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Initial drain on the originating side
    pub conn_init: Duration,
    /// Drain between state steps
    pub brief: Duration,
    /// Drains around the outbound batch
    pub settle: Duration,
    pub settle_rounds: u32,
    /// Drain after announcing a file
    pub announce: Duration,
    /// Drain between data chunks
    pub chunk: Duration,
    /// Poll interval of WAIT_ADDR, WAIT_PWD and WAIT_OK
    pub poll: Duration,
    pub addr_retries: u32,
    pub pwd_retries: u32,
    pub ok_retries: u32,
    pub eob_poll: Duration,
    pub eob_retries: u32,
    /// Drain before giving up in UNKNOWN and FATAL_ERROR
    pub fatal: Duration,
    /// Bound on reading a frame body once its header arrived
    pub body: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            conn_init: Duration::from_secs(2),
            brief: Duration::from_millis(100),
            settle: Duration::from_millis(500),
            settle_rounds: 5,
            announce: Duration::from_secs(2),
            chunk: Duration::from_millis(100),
            poll: Duration::from_secs(1),
            addr_retries: 10,
            pwd_retries: 30,
            ok_retries: 30,
            eob_poll: Duration::from_secs(5),
            eob_retries: 12,
            fatal: Duration::from_secs(3),
            body: Duration::from_secs(10),
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub side: BinkSide,
    pub network: Option<String>,
    pub remote_node: Option<u16>,
    pub success: bool,
    pub authenticated: bool,
    pub secure: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub files_received: Vec<String>,
    pub peer_system: Option<String>,
    pub peer_version: Option<String>,
    pub elapsed_secs: u64,
}

/// Stop condition of a drain, besides the peer going quiet.
#[derive(Debug, Clone, Copy)]
enum Until {
    Idle,
    Address,
    Password,
    Ok,
    Eob,
    Frames(usize),
}

pub struct BinkSession<C: Connection, S: SpoolStorage> {
    conn: C,
    config: Arc<BinkConfig>,
    storage: Arc<S>,
    side: BinkSide,
    timings: SessionTimings,
    /// The node dialed, originating side only
    expected: Option<WwivAddress>,
    /// The identified peer
    remote: Option<WwivAddress>,
    cram: Cram,
    auth_type: AuthType,
    peer_addresses: Vec<WwivAddress>,
    peer_address_line: String,
    address_received: bool,
    remote_password: Option<String>,
    peer_system: Option<String>,
    peer_version: Option<String>,
    ok_received: bool,
    eob_received: bool,
    eob_pending: bool,
    error_received: bool,
    error_sent: bool,
    authenticated: bool,
    transfers: TransferManager<S>,
    started: Instant,
    started_at: DateTime<Local>,
}

impl<C: Connection, S: SpoolStorage> BinkSession<C, S> {
    fn new(
        conn: C,
        config: Arc<BinkConfig>,
        storage: Arc<S>,
        side: BinkSide,
        expected: Option<WwivAddress>,
    ) -> Self {
        let mut transfers = TransferManager::new(storage.clone());
        if let Some(expected) = &expected {
            transfers.set_network(expected.network.clone());
        }
        Self {
            conn,
            config,
            storage,
            side,
            timings: SessionTimings::default(),
            expected,
            remote: None,
            cram: Cram::new(),
            auth_type: AuthType::PlainText,
            peer_addresses: Vec::new(),
            peer_address_line: String::new(),
            address_received: false,
            remote_password: None,
            peer_system: None,
            peer_version: None,
            ok_received: false,
            eob_received: false,
            eob_pending: false,
            error_received: false,
            error_sent: false,
            authenticated: false,
            transfers,
            started: Instant::now(),
            started_at: Local::now(),
        }
    }

    /// A session that dialed `node` on `network`.
    pub fn originating(
        conn: C,
        config: Arc<BinkConfig>,
        storage: Arc<S>,
        network: &str,
        node: u16,
    ) -> Result<Self> {
        if config.network(network).is_none() {
            return Err(anyhow!("network '{}' is not configured", network));
        }
        let expected = WwivAddress::new(node, network);
        Ok(Self::new(conn, config, storage, BinkSide::Originating, Some(expected)))
    }

    /// A session for an accepted connection.
    pub fn answering(conn: C, config: Arc<BinkConfig>, storage: Arc<S>) -> Self {
        Self::new(conn, config, storage, BinkSide::Answering, None)
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub async fn run(mut self) -> SessionReport {
        let mut state = match self.side {
            BinkSide::Originating => SessionState::ConnInit,
            BinkSide::Answering => SessionState::WaitConn,
        };
        loop {
            state = match self.step(state).await {
                Ok(next) => next,
                Err(e) => {
                    log_session_error(&e);
                    break;
                }
            };
            if state == SessionState::Done {
                break;
            }
            if self.error_received {
                error!("STATE: Error received.");
                break;
            }
            if let Err(e) = self.between_steps().await {
                log_session_error(&e);
                break;
            }
        }
        self.finish().await
    }

    async fn step(&mut self, state: SessionState) -> Result<SessionState> {
        match state {
            SessionState::ConnInit => self.conn_init().await,
            SessionState::WaitConn => self.wait_conn().await,
            SessionState::SendPassword => self.send_password().await,
            SessionState::WaitAddr => self.wait_addr().await,
            SessionState::AuthRemote => self.auth_remote().await,
            SessionState::IfSecure => {
                info!("STATE: IfSecure");
                Ok(SessionState::WaitOk)
            }
            SessionState::WaitPwd => self.wait_pwd().await,
            SessionState::PasswordAck => self.password_ack().await,
            SessionState::WaitOk => self.wait_ok().await,
            SessionState::TransferFiles => self.transfer_files().await,
            SessionState::WaitEob => self.wait_eob().await,
            SessionState::Unknown | SessionState::FatalError => {
                info!("STATE: {:?}", state);
                self.drain(Until::Frames(4), self.timings.fatal).await?;
                Ok(SessionState::Done)
            }
            SessionState::Done => Ok(SessionState::Done),
        }
    }

    async fn between_steps(&mut self) -> Result<()> {
        self.service_resends().await?;
        self.drain(Until::Idle, self.timings.brief).await
    }

    async fn conn_init(&mut self) -> Result<SessionState> {
        info!("STATE: ConnInit");
        self.drain(Until::Idle, self.timings.conn_init).await?;
        Ok(SessionState::WaitConn)
    }

    fn greeting(&mut self) -> Greeting {
        let cram_challenge = match self.side {
            BinkSide::Answering if self.config.cram_md5 => {
                Some(self.cram.generate_challenge().to_string())
            }
            _ => None,
        };
        let addresses = match &self.expected {
            Some(expected) => {
                let ours = self
                    .config
                    .network(&expected.network)
                    .map(|n| n.node)
                    .unwrap_or_default();
                vec![WwivAddress::new(ours, &expected.network)]
            }
            None => self
                .config
                .networks
                .iter()
                .map(|n| WwivAddress::new(n.node, &n.name))
                .collect(),
        };
        Greeting {
            system_name: self.config.system_name.clone(),
            sysop_name: self.config.sysop_name.clone(),
            cram_challenge,
            crc: self.config.crc,
            addresses,
        }
    }

    async fn wait_conn(&mut self) -> Result<SessionState> {
        info!("STATE: WaitConn");
        let greeting = self.greeting();
        for line in greeting.nul_lines() {
            self.send(Command::Nul(line)).await?;
        }
        self.send(Command::Adr(greeting.address_list())).await?;
        self.drain(Until::Idle, self.timings.brief).await?;
        Ok(match self.side {
            BinkSide::Originating => SessionState::SendPassword,
            BinkSide::Answering => SessionState::WaitAddr,
        })
    }

    async fn send_password(&mut self) -> Result<SessionState> {
        let Some(expected) = self.expected.clone() else {
            return Err(anyhow!("SendPassword on the answering side"));
        };
        info!(
            "STATE: SendPasswd for network '{}' for node: {}",
            expected.network, expected.node
        );
        let password =
            expected_password_for(self.config.callout_for(&expected.network, expected.node));
        let arg = match (self.auth_type, self.cram.challenge()) {
            (AuthType::CramMd5, Some(challenge)) => {
                format!("{}{}", CRAM_MD5_PREFIX, Cram::hash(challenge, &password))
            }
            _ => password,
        };
        self.send(Command::Pwd(arg)).await?;
        Ok(SessionState::WaitAddr)
    }

    async fn wait_addr(&mut self) -> Result<SessionState> {
        info!("STATE: WaitAddr");
        for _ in 0..self.timings.addr_retries {
            self.drain(Until::Address, self.timings.poll).await?;
            if self.address_received || self.error_received {
                break;
            }
        }
        Ok(SessionState::AuthRemote)
    }

    async fn auth_remote(&mut self) -> Result<SessionState> {
        info!("STATE: AuthRemote");
        info!("       remote address_list: {}", self.peer_address_line);

        if let Some(expected) = self.expected.clone() {
            info!("       expected_ftn: {}", expected);
            if self.peer_addresses.contains(&expected) {
                self.remote = Some(expected);
                return Ok(SessionState::IfSecure);
            }
            let message = format!(
                "Error (NETWORKB-0001): Unexpected Address: {}",
                self.peer_address_line
            );
            self.send(Command::Err(message)).await?;
            return Ok(SessionState::FatalError);
        }

        let Some(first) = self.peer_addresses.first().cloned() else {
            let message = format!(
                "Error (NETWORKB-0004): Unable to find a WWIVnet address in: '{}'",
                self.peer_address_line
            );
            self.send(Command::Err(message)).await?;
            return Ok(SessionState::FatalError);
        };
        let known = self
            .peer_addresses
            .iter()
            .find(|a| self.config.network(&a.network).is_some())
            .cloned();
        let Some(address) = known else {
            let message = format!(
                "Error (NETWORKB-0003): Unable to find callout configuration for: {}",
                first.network
            );
            self.send(Command::Err(message)).await?;
            return Ok(SessionState::FatalError);
        };
        if self.config.callout_for(&address.network, address.node).is_none() {
            let message = format!(
                "Error (NETWORKB-0002): Unexpected Address: {}",
                self.peer_address_line
            );
            self.send(Command::Err(message)).await?;
            return Ok(SessionState::FatalError);
        }

        info!("       remote network: {}; caller node: {}", address.network, address.node);
        self.transfers.set_network(address.network.clone());
        self.remote = Some(address);
        Ok(SessionState::WaitPwd)
    }

    async fn wait_pwd(&mut self) -> Result<SessionState> {
        info!("STATE: WaitPwd");
        for _ in 0..self.timings.pwd_retries {
            self.drain(Until::Password, self.timings.poll).await?;
            if self.remote_password.is_some() || self.error_received {
                break;
            }
            if self.error_sent {
                return Ok(SessionState::Done);
            }
        }
        Ok(SessionState::PasswordAck)
    }

    async fn password_ack(&mut self) -> Result<SessionState> {
        info!("STATE: PasswordAck");
        let Some(remote) = self.remote.clone() else {
            return Ok(SessionState::Done);
        };
        let expected =
            expected_password_for(self.config.callout_for(&remote.network, remote.node));
        let received = self.remote_password.clone().unwrap_or_default();
        let matches = match self.auth_type {
            AuthType::PlainText => received == expected,
            AuthType::CramMd5 => self
                .cram
                .challenge()
                .is_some_and(|challenge| Cram::validate(challenge, &expected, &received)),
        };

        if !matches {
            debug!("       password mismatch for node {}", remote.node);
            self.send(Command::Err(
                "Incorrect password received.  Please check your configuration.".to_string(),
            ))
            .await?;
            return Ok(SessionState::Done);
        }

        let message = match self.auth_type {
            AuthType::CramMd5 => "Passwords match; secure session.",
            AuthType::PlainText => "Passwords match; insecure session",
        };
        self.send(Command::Ok(message.to_string())).await?;
        Ok(SessionState::TransferFiles)
    }

    async fn wait_ok(&mut self) -> Result<SessionState> {
        info!("STATE: WaitOk");
        for _ in 0..self.timings.ok_retries {
            self.drain(Until::Ok, self.timings.poll).await?;
            if self.ok_received {
                return Ok(SessionState::TransferFiles);
            }
            if self.error_received {
                return Ok(SessionState::Done);
            }
        }
        info!("       after WaitOk: M_OK never received.");
        self.send(Command::Err(
            "M_OK never received. Timed out waiting for it.".to_string(),
        ))
        .await?;
        Ok(SessionState::Done)
    }

    async fn transfer_files(&mut self) -> Result<SessionState> {
        self.authenticated = true;
        let Some(remote) = self.remote.clone() else {
            return Ok(SessionState::Done);
        };
        info!("STATE: TransferFiles to node: {}", remote.node);
        self.drain(Until::Idle, self.timings.settle).await?;

        let files = match self.storage.outbound_for(&remote.network, remote.node).await {
            Ok(files) => files,
            Err(e) => {
                warn!("unable to list outbound files for node {}: {}", remote.node, e);
                Vec::new()
            }
        };
        for file in files {
            self.send_file(file).await?;
        }

        info!("STATE: After SendFilePacket for all files.");
        for _ in 0..self.timings.settle_rounds {
            self.drain(Until::Idle, self.timings.settle).await?;
            self.service_resends().await?;
        }

        if self.transfers.in_flight() == 0 {
            self.send_eob().await?;
            self.drain(Until::Idle, self.timings.poll).await?;
        } else {
            info!(
                "       {} file(s) awaiting M_GOT, not sending EOB yet",
                self.transfers.in_flight()
            );
            self.eob_pending = true;
        }
        Ok(SessionState::WaitEob)
    }

    async fn wait_eob(&mut self) -> Result<SessionState> {
        info!("STATE: WaitEob: eob_received: {}", self.eob_received);
        if self.batch_complete() {
            return Ok(SessionState::Done);
        }
        for _ in 0..self.timings.eob_retries {
            self.drain(Until::Eob, self.timings.eob_poll).await?;
            if self.batch_complete() || self.error_received {
                return Ok(SessionState::Done);
            }
            self.service_resends().await?;
            debug!("       WaitEob: still waiting for M_EOB");
        }
        Ok(SessionState::Done)
    }

    /// The peer finished its batch and ours is settled.
    fn batch_complete(&self) -> bool {
        self.eob_received && !self.eob_pending
    }

    async fn send_eob(&mut self) -> Result<()> {
        self.eob_pending = false;
        info!("       Sending EOB");
        self.send(Command::Eob(
            "All files to send have been sent. Thank you.".to_string(),
        ))
        .await
    }

    async fn send_file(&mut self, file: OutboundFile) -> Result<()> {
        let name = file.name.clone();
        let line = match self.transfers.start_outbound(file).await {
            Ok(line) => line,
            Err(e) => {
                error!("unable to open {} for sending: {}", name, e);
                return Ok(());
            }
        };
        self.send(Command::File(line.to_line())).await?;
        self.drain(Until::Idle, self.timings.announce).await?;
        self.send_file_data(&name).await
    }

    /// Stream the file as data frames, stopping early if the peer settles it.
    async fn send_file_data(&mut self, name: &str) -> Result<()> {
        debug!("       SendFileData: {}", name);
        while let Some(chunk) = self.transfers.read_chunk(name).await? {
            if chunk.is_empty() {
                break;
            }
            write_data(&mut self.conn, &chunk).await?;
            self.drain(Until::Idle, self.timings.chunk).await?;
        }
        Ok(())
    }

    async fn service_resends(&mut self) -> Result<()> {
        while let Some(line) = self.transfers.next_resend().await? {
            info!("       re-sending {}", line.name);
            self.send(Command::File(line.to_line())).await?;
            self.send_file_data(&line.name).await?;
        }
        Ok(())
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        info!("SEND:  command: {}: {}", command.name(), command.log_arg());
        if matches!(command, Command::Err(_)) {
            self.error_sent = true;
        }
        write_command(&mut self.conn, &command).await?;
        Ok(())
    }

    fn satisfied(&self, until: Until, handled: usize) -> bool {
        match until {
            Until::Frames(n) => handled >= n,
            _ if self.error_received => true,
            Until::Idle => false,
            Until::Address => self.address_received,
            Until::Password => self.remote_password.is_some(),
            Until::Ok => self.ok_received,
            Until::Eob => self.batch_complete() || self.transfers.has_pending_resend(),
        }
    }

    /// Process inbound frames until `until` holds or none arrives within `wait`.
    async fn drain(&mut self, until: Until, wait: Duration) -> Result<()> {
        let mut handled = 0;
        while !self.satisfied(until, handled) {
            match read_frame(&mut self.conn, wait, self.timings.body).await {
                Ok(frame) => {
                    self.handle_frame(frame).await?;
                    handled += 1;
                }
                Err(TransportError::Timeout) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Command(command) => self.handle_command(command).await,
            Frame::Data(data) => {
                if let Some(ack) = self.transfers.receive_data(&data).await? {
                    self.send(Command::Got(ack.to_line())).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        info!("RECV:  command: {}: {}", command.name(), command.log_arg());
        match command {
            Command::Nul(line) => self.handle_nul(&line),
            Command::Adr(list) => {
                self.peer_addresses = parse_address_list(&list);
                self.peer_address_line = list;
                self.address_received = true;
            }
            Command::Pwd(password) => self.handle_password(password).await?,
            Command::File(line) => match FileLine::parse(&line) {
                Ok(line) => self.handle_file(line).await?,
                Err(e) => warn!("ignoring M_FILE: {}", e),
            },
            Command::Ok(_) => self.ok_received = true,
            Command::Eob(_) => self.eob_received = true,
            Command::Got(line) => match AckLine::parse(&line) {
                Ok(ack) => {
                    self.transfers.handle_got(&ack).await?;
                    self.maybe_send_pending_eob().await?;
                }
                Err(e) => warn!("ignoring M_GOT: {}", e),
            },
            Command::Skip(line) => match AckLine::parse(&line) {
                Ok(ack) => {
                    self.transfers.handle_skip(&ack);
                    self.maybe_send_pending_eob().await?;
                }
                Err(e) => warn!("ignoring M_SKIP: {}", e),
            },
            Command::Get(line) => match FileLine::parse(&line) {
                Ok(line) => {
                    self.transfers.request_resend(&line);
                }
                Err(e) => warn!("ignoring M_GET: {}", e),
            },
            Command::Err(message) => {
                error!("       M_ERR from peer: {}", message);
                self.error_received = true;
            }
            Command::Bsy(message) => {
                warn!("       peer is busy: {}", message);
                self.error_received = true;
            }
            Command::Unknown { id, .. } => warn!("       unknown command id {}, ignoring", id),
        }
        Ok(())
    }

    fn handle_nul(&mut self, line: &str) {
        match parse_nul(line) {
            NulLine::Opt(opts) => {
                if let Some(challenge) = opts.cram_challenge {
                    // Only the answering side issues challenges.
                    if self.side == BinkSide::Answering {
                        warn!("       ignoring CRAM challenge offered by the caller");
                    } else if !self.cram.set_challenge(challenge) {
                        warn!("       ignoring repeated CRAM challenge");
                    } else if self.config.cram_md5 {
                        self.auth_type = AuthType::CramMd5;
                    } else {
                        info!("       CRAM-MD5 disabled locally; using plain text passwords.");
                    }
                }
                if opts.crc {
                    if self.config.crc {
                        info!("       Enabling CRC support");
                        self.transfers.set_crc(true);
                    } else {
                        info!("       Not enabling CRC support (disabled locally).");
                    }
                }
            }
            NulLine::System(system) => self.peer_system = Some(system),
            NulLine::Version(version) => self.peer_version = Some(version),
            NulLine::Other(_) => {}
        }
    }

    async fn handle_password(&mut self, password: String) -> Result<()> {
        if let Some(hash) = password.strip_prefix(CRAM_MD5_PREFIX) {
            info!("       received CRAM-MD5 hashed password");
            self.auth_type = AuthType::CramMd5;
            self.remote_password = Some(hash.to_string());
        } else if password.starts_with("CRAM") {
            self.send(Command::Err(
                "CRAM authentication required, no common hash function".to_string(),
            ))
            .await?;
        } else {
            info!("       received plain text password");
            self.auth_type = AuthType::PlainText;
            self.remote_password = Some(password);
        }
        Ok(())
    }

    async fn handle_file(&mut self, line: FileLine) -> Result<()> {
        let (name, length, timestamp) = (line.name.clone(), line.length, line.timestamp);
        match self.transfers.begin_receive(line).await {
            Ok(Some(ack)) => self.send(Command::Got(ack.to_line())).await,
            Ok(None) => Ok(()),
            Err(e) => {
                error!("unable to receive {}: {}", name, e);
                let skip = AckLine { name, length, timestamp: Some(timestamp), crc: None };
                self.send(Command::Skip(skip.to_line())).await
            }
        }
    }

    async fn maybe_send_pending_eob(&mut self) -> Result<()> {
        if self.eob_pending && self.transfers.in_flight() == 0 {
            self.send_eob().await?;
        }
        Ok(())
    }

    async fn finish(mut self) -> SessionReport {
        info!("STATE: Done.");
        let success = self.authenticated && !self.error_received && !self.error_sent;
        self.conn.close().await;
        self.transfers.abandon().await;
        let elapsed = self.started.elapsed();

        // The dialed node is charged even when it never identified itself.
        let peer = self.remote.clone().or_else(|| self.expected.clone());
        if let Some(remote) = peer.clone() {
            let bytes_sent = self.transfers.bytes_sent();
            let bytes_received = self.transfers.bytes_received();
            if let Some(network) = self.config.network(&remote.network) {
                let outcome = ContactOutcome {
                    node: remote.node,
                    time: self.started_at.timestamp(),
                    success,
                    bytes_sent,
                    bytes_received,
                };
                record_contact(network.contact_path(), outcome).await;
            }
            let entry = NetLogEntry {
                started: self.started_at,
                side: self.side,
                node: remote.node,
                network: remote.network.clone(),
                bytes_sent,
                bytes_received,
                elapsed,
                success,
            };
            if let Err(e) = netlog::append(self.config.net_log_path(), &entry).await {
                error!("unable to write net.log: {}", e);
            }
        }

        let report = SessionReport {
            side: self.side,
            network: peer.as_ref().map(|r| r.network.clone()),
            remote_node: peer.as_ref().map(|r| r.node),
            success,
            authenticated: self.authenticated,
            secure: self.auth_type == AuthType::CramMd5,
            bytes_sent: self.transfers.bytes_sent(),
            bytes_received: self.transfers.bytes_received(),
            files_received: self
                .transfers
                .received_files()
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            peer_system: self.peer_system.take(),
            peer_version: self.peer_version.take(),
            elapsed_secs: elapsed.as_secs(),
        };
        info!(
            "session with {:?} finished: success={} sent={} received={}",
            report.remote_node, report.success, report.bytes_sent, report.bytes_received
        );
        report
    }
}

struct ContactOutcome {
    node: u16,
    time: i64,
    success: bool,
    bytes_sent: u64,
    bytes_received: u64,
}

async fn record_contact(path: PathBuf, outcome: ContactOutcome) {
    let node = outcome.node;
    let result = ContactLedger::update_async(path, move |ledger| {
        let record = ledger.record_mut(outcome.node);
        if outcome.success {
            record.add_connect(outcome.time, outcome.bytes_sent, outcome.bytes_received);
        } else {
            record.add_failure(outcome.time);
        }
    })
    .await;
    if let Err(e) = result {
        error!("unable to update contact ledger for node {}: {}", node, e);
    }
}

fn log_session_error(e: &anyhow::Error) {
    match e.downcast_ref::<TransportError>() {
        Some(TransportError::Closed) => info!("       connection was closed by the other side."),
        _ => error!("session error: {:#}", e),
    }
}
