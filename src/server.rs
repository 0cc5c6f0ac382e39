use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::callout::should_call;
use crate::config::BinkConfig;
use crate::contact::{ContactLedger, ContactRecord};
use crate::protocol::BINKP_PORT;
use crate::session::{BinkSession, SessionReport, SessionTimings};
use crate::storage::SpoolStorage;
use crate::transport::StreamConnection;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_answering<S>(config: Arc<BinkConfig>, storage: Arc<S>) -> anyhow::Result<()>
where
    S: SpoolStorage + 'static,
{
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!("Server listening on {}", config.listen_address);

    for network in &config.networks {
        match storage.discard_partials(&network.name).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} stale partial file(s) for {}", n, network.name),
            Err(e) => warn!("Unable to clean receive directory for {}: {}", network.name, e),
        }
    }

    serve(listener, config, storage, SessionTimings::default()).await
}

/// Accept loop: one answering session task per connection.
pub async fn serve<S>(
    listener: TcpListener,
    config: Arc<BinkConfig>,
    storage: Arc<S>,
    timings: SessionTimings,
) -> anyhow::Result<()>
where
    S: SpoolStorage + 'static,
{
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                if let Err(e) = socket.set_nodelay(true) {
                    warn!("Unable to set TCP_NODELAY for {}: {}", peer, e);
                }
                let config = Arc::clone(&config);
                let storage = Arc::clone(&storage);
                let timings = timings.clone();

                tokio::spawn(async move {
                    let conn = StreamConnection::new(socket, peer.to_string());
                    let report = BinkSession::answering(conn, config, storage)
                        .with_timings(timings)
                        .run()
                        .await;
                    if report.success {
                        info!("Session completed for {}", peer);
                    } else {
                        warn!("Session with {} failed", peer);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

fn dial_address(host: &str) -> String {
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        host.to_string()
    } else {
        format!("{}:{}", host, BINKP_PORT)
    }
}

pub async fn call_node<S>(
    config: Arc<BinkConfig>,
    storage: Arc<S>,
    network: &str,
    node: u16,
) -> anyhow::Result<SessionReport>
where
    S: SpoolStorage + 'static,
{
    call_node_with(config, storage, network, node, SessionTimings::default()).await
}

/// Dial the configured host of `node` and run an originating session.
pub async fn call_node_with<S>(
    config: Arc<BinkConfig>,
    storage: Arc<S>,
    network: &str,
    node: u16,
    timings: SessionTimings,
) -> anyhow::Result<SessionReport>
where
    S: SpoolStorage + 'static,
{
    let net = config
        .network(network)
        .ok_or_else(|| anyhow!("network '{}' is not configured", network))?;
    let callout = net
        .callout_for(node)
        .ok_or_else(|| anyhow!("no callout entry for node {} on {}", node, network))?;
    let Some(host) = callout.host.as_deref() else {
        bail!("no host configured for node {} on {}", node, network);
    };
    let addr = dial_address(host);
    let contact_path = net.contact_path();

    let now = Utc::now().timestamp();
    ContactLedger::update_async(contact_path.clone(), move |ledger| {
        ledger.record_mut(node).record_attempt(now)
    })
    .await?;

    info!("Connecting to node {} at {}", node, addr);
    let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            record_connect_failure(contact_path, node).await;
            return Err(anyhow!("unable to connect to {}: {}", addr, e));
        }
        Err(_) => {
            record_connect_failure(contact_path, node).await;
            bail!("timed out connecting to {}", addr);
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Unable to set TCP_NODELAY for {}: {}", addr, e);
    }

    let conn = StreamConnection::new(stream, addr);
    let session = BinkSession::originating(conn, config.clone(), storage, network, node)?
        .with_timings(timings);
    Ok(session.run().await)
}

async fn record_connect_failure(contact_path: std::path::PathBuf, node: u16) {
    let now = Utc::now().timestamp();
    if let Err(e) =
        ContactLedger::update_async(contact_path, move |l| l.record_mut(node).add_failure(now))
            .await
    {
        error!("Unable to record failure for node {}: {}", node, e);
    }
}

/// Callout decision for one configured node.
#[derive(Debug, Clone, Serialize)]
pub struct PendingCallout {
    pub network: String,
    pub node: u16,
    pub host: Option<String>,
    pub should_call: bool,
    pub contact: ContactRecord,
}

/// Refresh each node's queued byte count and evaluate the callout policy.
pub async fn pending_callouts<S, Tz>(
    config: &BinkConfig,
    storage: &S,
    now: &DateTime<Tz>,
) -> anyhow::Result<Vec<PendingCallout>>
where
    S: SpoolStorage,
    Tz: TimeZone,
{
    let mut pending = Vec::new();
    let timestamp = now.timestamp();

    for network in &config.networks {
        let mut waiting = BTreeMap::new();
        for callout in &network.callouts {
            let bytes = storage.bytes_waiting(&network.name, callout.node).await?;
            waiting.insert(callout.node, bytes);
        }

        let records = ContactLedger::update_async(network.contact_path(), move |ledger| {
            ledger.fixup_all(timestamp);
            waiting
                .into_iter()
                .map(|(node, bytes)| {
                    let record = ledger.record_mut(node);
                    record.bytes_waiting = bytes;
                    (node, record.clone())
                })
                .collect::<BTreeMap<_, _>>()
        })
        .await?;

        for callout in &network.callouts {
            let contact = records.get(&callout.node).cloned().unwrap_or_default();
            pending.push(PendingCallout {
                network: network.name.clone(),
                node: callout.node,
                host: callout.host.clone(),
                should_call: should_call(&contact, callout, now),
                contact,
            });
        }
    }
    Ok(pending)
}
