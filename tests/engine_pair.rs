mod common;

use std::path::Path;
use std::sync::Arc;

use binkpd::auth::Cram;
use binkpd::config::BinkConfig;
use binkpd::contact::ContactLedger;
use binkpd::protocol::{Command, Frame, CRAM_MD5_PREFIX};
use binkpd::server;
use binkpd::session::BinkSession;
use binkpd::storage::LocalSpool;
use binkpd::transport::{StreamConnection, TransportError};
use tokio::io::duplex;
use tokio::net::TcpListener;

use common::*;

fn prepare(dir: &Path, config: &BinkConfig) -> Arc<LocalSpool> {
    std::fs::create_dir_all(net_dir(dir)).unwrap();
    Arc::new(LocalSpool::from_config(config))
}

fn secure(mut config: BinkConfig) -> BinkConfig {
    config.cram_md5 = true;
    config.crc = true;
    config
}

#[tokio::test]
async fn cram_and_crc_session_delivers_both_ways() {
    init_tracing();
    let answer_dir = tempfile::tempdir().unwrap();
    let call_dir = tempfile::tempdir().unwrap();
    let answer_config = secure(node_config(answer_dir.path(), 1, 2, "sharedsecret"));
    let call_config = secure(node_config(call_dir.path(), 2, 1, "sharedsecret"));
    let answer_storage = prepare(answer_dir.path(), &answer_config);
    let call_storage = prepare(call_dir.path(), &call_config);

    let to_caller: Vec<u8> = (0..5_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let to_answerer: Vec<u8> = (0..40_000u32).map(|i| (i * 13 % 256) as u8).collect();
    std::fs::write(net_dir(answer_dir.path()).join("s2.net"), &to_caller).unwrap();
    std::fs::write(net_dir(call_dir.path()).join("s1.net"), &to_answerer).unwrap();

    let (a, b) = duplex(64 * 1024);
    let answering = BinkSession::answering(
        StreamConnection::new(a, "caller"),
        Arc::new(answer_config),
        answer_storage,
    )
    .with_timings(fast_timings());
    let originating = BinkSession::originating(
        StreamConnection::new(b, "answerer"),
        Arc::new(call_config),
        call_storage,
        "wwivnet",
        1,
    )
    .unwrap()
    .with_timings(fast_timings());

    let (answered, called) = tokio::join!(answering.run(), originating.run());

    assert!(answered.success, "{:?}", answered);
    assert!(called.success, "{:?}", called);
    assert!(answered.secure && called.secure);
    assert_eq!(answered.remote_node, Some(2));
    assert_eq!((answered.bytes_sent, answered.bytes_received), (5_000, 40_000));
    assert_eq!((called.bytes_sent, called.bytes_received), (40_000, 5_000));

    let answer_net = net_dir(answer_dir.path());
    let call_net = net_dir(call_dir.path());
    assert!(!answer_net.join("s2.net").exists());
    assert!(!call_net.join("s1.net").exists());
    assert_eq!(std::fs::read(answer_net.join("p1-0-0.net")).unwrap(), to_answerer);
    assert_eq!(std::fs::read(call_net.join("p1-0-0.net")).unwrap(), to_caller);

    let ledger = ContactLedger::load(answer_net.join("contact.json")).unwrap();
    assert_eq!(ledger.get(2).unwrap().bytes_received, 40_000);
    let ledger = ContactLedger::load(call_net.join("contact.json")).unwrap();
    assert_eq!(ledger.get(1).unwrap().bytes_sent, 40_000);

    let log = std::fs::read_to_string(answer_dir.path().join("net.log")).unwrap();
    assert!(log.contains(" Fr 2 S:5k R:40k "), "{}", log);
}

#[tokio::test]
async fn wrong_password_is_refused_and_recorded() {
    init_tracing();
    let answer_dir = tempfile::tempdir().unwrap();
    let call_dir = tempfile::tempdir().unwrap();
    let answer_config = node_config(answer_dir.path(), 1, 2, "right");
    let call_config = node_config(call_dir.path(), 2, 1, "wrong");
    let answer_storage = prepare(answer_dir.path(), &answer_config);
    let call_storage = prepare(call_dir.path(), &call_config);
    std::fs::write(net_dir(answer_dir.path()).join("s2.net"), b"private").unwrap();

    let (a, b) = duplex(64 * 1024);
    let answering = BinkSession::answering(
        StreamConnection::new(a, "caller"),
        Arc::new(answer_config),
        answer_storage,
    )
    .with_timings(fast_timings());
    let originating = BinkSession::originating(
        StreamConnection::new(b, "answerer"),
        Arc::new(call_config),
        call_storage,
        "wwivnet",
        1,
    )
    .unwrap()
    .with_timings(fast_timings());

    let (answered, called) = tokio::join!(answering.run(), originating.run());

    assert!(!answered.success);
    assert!(!answered.authenticated);
    assert!(!called.success);
    assert!(net_dir(answer_dir.path()).join("s2.net").exists());

    let ledger = ContactLedger::load(net_dir(answer_dir.path()).join("contact.json")).unwrap();
    let record = ledger.get(2).unwrap();
    assert_eq!(record.num_failures, 1);
    assert_eq!(record.bytes_sent, 0);
}

#[tokio::test]
async fn answering_rejects_unknown_node() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), 1, 2, "-");
    let storage = prepare(dir.path(), &config);

    let (a, b) = duplex(64 * 1024);
    let answering = BinkSession::answering(StreamConnection::new(a, "caller"), Arc::new(config), storage)
        .with_timings(fast_timings());

    let peer = async move {
        let mut peer = MockPeer::new(b);
        let seen = peer.recv_until(|c| matches!(c, Command::Adr(_))).await;
        let offered_cram = commands(&seen)
            .iter()
            .any(|c| matches!(c, Command::Nul(l) if l.starts_with("OPT CRAM-MD5-")));
        assert!(!offered_cram);

        peer.greet(9).await;
        peer.send(Command::Pwd("-".into())).await;
        let seen = peer.recv_until(|c| matches!(c, Command::Err(_))).await;
        let Some(Frame::Command(Command::Err(message))) = seen.last() else { unreachable!() };
        assert!(message.contains("NETWORKB-0002"), "{}", message);
        peer.wait_closed().await;
    };

    let (report, ()) = tokio::join!(answering.run(), peer);
    assert!(!report.success);
    assert_eq!(report.remote_node, None);
    assert!(!net_dir(dir.path()).join("contact.json").exists());
}

#[tokio::test]
async fn answering_rejects_unknown_network() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), 1, 2, "-");
    let storage = prepare(dir.path(), &config);

    let (a, b) = duplex(64 * 1024);
    let answering = BinkSession::answering(StreamConnection::new(a, "caller"), Arc::new(config), storage)
        .with_timings(fast_timings());

    let peer = async move {
        let mut peer = MockPeer::new(b);
        peer.send(Command::Adr("20000:20000/2@othernet".into())).await;
        let seen = peer.recv_until(|c| matches!(c, Command::Err(_))).await;
        let Some(Frame::Command(Command::Err(message))) = seen.last() else { unreachable!() };
        assert!(message.contains("NETWORKB-0003"), "{}", message);
        peer.wait_closed().await;
    };

    let (report, ()) = tokio::join!(answering.run(), peer);
    assert!(!report.success);
}

#[tokio::test]
async fn dialer_reaches_listener_over_tcp() {
    init_tracing();
    let answer_dir = tempfile::tempdir().unwrap();
    let call_dir = tempfile::tempdir().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let answer_config = node_config(answer_dir.path(), 1, 2, "pw");
    let mut call_config = node_config(call_dir.path(), 2, 1, "pw");
    call_config.networks[0].callouts[0].host = Some(format!("127.0.0.1:{}", port));
    let answer_storage = prepare(answer_dir.path(), &answer_config);
    let call_storage = prepare(call_dir.path(), &call_config);
    std::fs::write(net_dir(call_dir.path()).join("s1.net"), b"over the wire").unwrap();

    let server_task = tokio::spawn(server::serve(
        listener,
        Arc::new(answer_config),
        answer_storage,
        fast_timings(),
    ));

    let report = server::call_node_with(Arc::new(call_config), call_storage, "wwivnet", 1, fast_timings())
        .await
        .unwrap();
    assert!(report.success, "{:?}", report);
    assert_eq!(report.bytes_sent, 13);

    // The answering task finishes its bookkeeping after the caller hangs up.
    let delivered = net_dir(answer_dir.path()).join("p1-0-0.net");
    for _ in 0..50 {
        if delivered.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(std::fs::read(&delivered).unwrap(), b"over the wire");

    let ledger = ContactLedger::load(net_dir(call_dir.path()).join("contact.json")).unwrap();
    let record = ledger.get(1).unwrap();
    assert_eq!(record.num_contacts, 1);
    assert!(record.last_attempt > 0);

    server_task.abort();
}

#[tokio::test]
async fn connect_failure_is_recorded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = node_config(dir.path(), 2, 1, "-");
    config.networks[0].callouts[0].host = Some(format!("127.0.0.1:{}", port));
    let storage = prepare(dir.path(), &config);

    let result = server::call_node_with(Arc::new(config), storage, "wwivnet", 1, fast_timings()).await;
    assert!(result.is_err());

    let ledger = ContactLedger::load(net_dir(dir.path()).join("contact.json")).unwrap();
    assert_eq!(ledger.get(1).unwrap().num_failures, 1);
}

fn answering_session(
    dir: &Path,
    config: BinkConfig,
    stream: tokio::io::DuplexStream,
) -> BinkSession<StreamConnection<tokio::io::DuplexStream>, LocalSpool> {
    let storage = prepare(dir, &config);
    BinkSession::answering(StreamConnection::new(stream, "caller"), Arc::new(config), storage)
        .with_timings(fast_timings())
}

/// Read until the other side hangs up, returning every frame seen.
async fn recv_until_closed(peer: &mut MockPeer) -> Vec<Frame> {
    let mut seen = Vec::new();
    loop {
        match peer.recv().await {
            Ok(frame) => seen.push(frame),
            Err(TransportError::Closed) => return seen,
            Err(e) => panic!("unexpected transport error: {}", e),
        }
    }
}

#[tokio::test]
async fn caller_cannot_choose_the_cram_challenge() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = secure(node_config(dir.path(), 1, 2, "sharedsecret"));
    let (a, b) = duplex(64 * 1024);
    let answering = answering_session(dir.path(), config, a);

    let peer = async move {
        let mut peer = MockPeer::new(b);
        let seen = peer.recv_until(|c| matches!(c, Command::Adr(_))).await;
        let offered = commands(&seen)
            .iter()
            .find_map(|c| match c {
                Command::Nul(l) => l.strip_prefix("OPT CRAM-MD5-").map(str::to_string),
                _ => None,
            })
            .unwrap();
        assert_ne!(offered, "deadbeef");

        peer.greet(2).await;
        peer.send(Command::Nul("OPT CRAM-MD5-deadbeef".into())).await;
        let replayed = Cram::hash("deadbeef", "sharedsecret");
        peer.send(Command::Pwd(format!("{}{}", CRAM_MD5_PREFIX, replayed))).await;

        let seen = recv_until_closed(&mut peer).await;
        let cmds = commands(&seen);
        assert!(!cmds.iter().any(|c| matches!(c, Command::Ok(_))), "{:?}", cmds);
        assert!(cmds
            .iter()
            .any(|c| matches!(c, Command::Err(m) if m.starts_with("Incorrect password"))));
    };

    let (report, ()) = tokio::join!(answering.run(), peer);
    assert!(!report.success);
    assert!(!report.authenticated);
    let ledger = ContactLedger::load(net_dir(dir.path()).join("contact.json")).unwrap();
    assert_eq!(ledger.get(2).unwrap().num_failures, 1);
}

#[tokio::test]
async fn caller_that_never_sends_password_is_refused() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), 1, 2, "sharedsecret");
    let (a, b) = duplex(64 * 1024);
    let answering = answering_session(dir.path(), config, a);

    let peer = async move {
        let mut peer = MockPeer::new(b);
        peer.recv_until(|c| matches!(c, Command::Adr(_))).await;
        peer.greet(2).await;
        let seen = recv_until_closed(&mut peer).await;
        let errors: Vec<_> = commands(&seen)
            .into_iter()
            .filter(|c| matches!(c, Command::Err(_)))
            .collect();
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(matches!(errors[0], Command::Err(m) if m.starts_with("Incorrect password")));
    };

    let (report, ()) = tokio::join!(answering.run(), peer);
    assert!(!report.success);
    assert_eq!(report.remote_node, Some(2));
    let ledger = ContactLedger::load(net_dir(dir.path()).join("contact.json")).unwrap();
    assert_eq!(ledger.get(2).unwrap().num_failures, 1);
}

#[tokio::test]
async fn unsupported_cram_hash_ends_session_with_one_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), 1, 2, "sharedsecret");
    let (a, b) = duplex(64 * 1024);
    let answering = answering_session(dir.path(), config, a);

    let started = std::time::Instant::now();
    let peer = async move {
        let mut peer = MockPeer::new(b);
        peer.recv_until(|c| matches!(c, Command::Adr(_))).await;
        peer.greet(2).await;
        peer.send(Command::Pwd("CRAM-SHA1-0123456789abcdef".into())).await;
        let seen = recv_until_closed(&mut peer).await;
        let errors: Vec<_> = commands(&seen)
            .into_iter()
            .filter(|c| matches!(c, Command::Err(_)))
            .collect();
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(matches!(errors[0], Command::Err(m) if m.contains("no common hash function")));
    };

    let (report, ()) = tokio::join!(answering.run(), peer);
    assert!(!report.success);
    // Well short of the password wait budget (30 polls of 100ms).
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
    let ledger = ContactLedger::load(net_dir(dir.path()).join("contact.json")).unwrap();
    assert_eq!(ledger.get(2).unwrap().num_failures, 1);
}
