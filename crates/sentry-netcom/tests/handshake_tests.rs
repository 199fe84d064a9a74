//! 会话建立端到端测试
//!
//! 本地起服务端，用 rustls 客户端走完 TLS 控制通道与 UDP 上行握手。

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use sentry_actor::{Mailbox, Worker};
use sentry_netcom::{NetcomConfig, NetcomServer};
use sentry_protocol::{
    CONNECT_RECORD_LEN, ConnectRecord, ControlCommand, KEY_RECORD_LEN, KeyRecord, Message,
    MoveDirection,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

struct Fixture {
    sink: Arc<Mailbox>,
    worker: Worker,
    tcp: SocketAddr,
    udp: SocketAddr,
    client_config: Arc<ClientConfig>,
    files: Vec<PathBuf>,
}

impl Fixture {
    fn start(tag: &str) -> Self {
        Self::start_with(tag, NetcomConfig::default().handshake_timeout_ms)
    }

    fn start_with(tag: &str, handshake_timeout_ms: u64) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let certfile = dir.join(format!("sentry-hs-{}-{}.pem", std::process::id(), tag));
        let keyfile = dir.join(format!("sentry-hs-{}-{}.key", std::process::id(), tag));
        std::fs::write(&certfile, cert.cert.pem()).unwrap();
        std::fs::write(&keyfile, cert.key_pair.serialize_pem()).unwrap();

        let config = NetcomConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            certfile: certfile.clone(),
            keyfile: keyfile.clone(),
            handshake_timeout_ms,
            ..NetcomConfig::default()
        };

        let sink = Arc::new(Mailbox::new());
        let server = NetcomServer::bind(&config, Arc::clone(&sink)).unwrap();
        let (tcp, udp) = server.local_addrs().unwrap();
        assert_eq!(tcp.port(), udp.port());

        let mut worker = Worker::new("netcom", server);
        worker.start().unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(cert.cert.der().clone()).unwrap();
        let client_config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        Self {
            sink,
            worker,
            tcp,
            udp,
            client_config: Arc::new(client_config),
            files: vec![certfile, keyfile],
        }
    }

    fn connect(&self) -> (TlsStream, ConnectRecord) {
        let sock = TcpStream::connect(self.tcp).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let conn = ClientConnection::new(Arc::clone(&self.client_config), name).unwrap();
        let mut tls = StreamOwned::new(conn, sock);

        let mut buf = [0u8; CONNECT_RECORD_LEN];
        tls.read_exact(&mut buf).unwrap();
        let record = ConnectRecord::decode(&buf).unwrap();
        (tls, record)
    }

    fn next_message(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.sink.pop() {
                return Some(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.sink.wait_timeout(deadline - now);
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.worker.stop();
        for file in &self.files {
            let _ = std::fs::remove_file(file);
        }
    }
}

fn uplink_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn read_key(tls: &mut TlsStream) -> KeyRecord {
    let mut buf = [0u8; KEY_RECORD_LEN];
    tls.read_exact(&mut buf).unwrap();
    KeyRecord::decode(&buf).unwrap()
}

#[test]
fn test_full_session_establishment() {
    let fixture = Fixture::start("full");
    let (mut tls, record) = fixture.connect();

    let uplink = uplink_socket();
    uplink.send_to(&record.encode(), fixture.udp).unwrap();

    let key = read_key(&mut tls);

    match fixture.next_message(Duration::from_secs(5)) {
        Some(Message::NetcomClientAlive(session)) => {
            assert_eq!(session.client_id, record.client_id);
            assert_eq!(session.peer, uplink.local_addr().unwrap());
            assert_eq!(session.key[..], key.key[..]);
        },
        other => panic!("expected NetcomClientAlive, got {:?}", other),
    }
}

#[test]
fn test_control_commands_forwarded() {
    let fixture = Fixture::start("control");
    let (mut tls, record) = fixture.connect();

    tls.write_all(&ControlCommand::Move(MoveDirection::TurnLeft).encode())
        .unwrap();
    tls.write_all(&ControlCommand::CameraRequest.encode()).unwrap();
    tls.write_all(&ControlCommand::Heartbeat.encode()).unwrap();
    tls.flush().unwrap();

    let timeout = Duration::from_secs(5);
    assert!(matches!(
        fixture.next_message(timeout),
        Some(Message::Move(MoveDirection::TurnLeft))
    ));
    match fixture.next_message(timeout) {
        Some(Message::CameraRequest { client_id }) => assert_eq!(client_id, record.client_id),
        other => panic!("expected CameraRequest, got {:?}", other),
    }
    assert!(matches!(fixture.next_message(timeout), Some(Message::Heartbeat)));
}

#[test]
fn test_wrong_otp_is_silently_ignored() {
    let fixture = Fixture::start("otp");
    let (mut tls, record) = fixture.connect();
    let uplink = uplink_socket();

    let mut forged = record.clone();
    forged.otp[0] ^= 0xFF;
    uplink.send_to(&forged.encode(), fixture.udp).unwrap();
    assert!(fixture.next_message(Duration::from_millis(300)).is_none());

    // 失败的尝试不影响后续正确握手
    uplink.send_to(&record.encode(), fixture.udp).unwrap();
    read_key(&mut tls);
    assert!(matches!(
        fixture.next_message(Duration::from_secs(5)),
        Some(Message::NetcomClientAlive(_))
    ));
}

#[test]
fn test_duplicate_uplink_handshake_rejected() {
    let fixture = Fixture::start("dup");
    let (mut tls, record) = fixture.connect();
    let uplink = uplink_socket();

    uplink.send_to(&record.encode(), fixture.udp).unwrap();
    read_key(&mut tls);
    assert!(matches!(
        fixture.next_message(Duration::from_secs(5)),
        Some(Message::NetcomClientAlive(_))
    ));

    let other = uplink_socket();
    other.send_to(&record.encode(), fixture.udp).unwrap();
    assert!(fixture.next_message(Duration::from_millis(300)).is_none());
}

#[test]
fn test_unknown_client_id_ignored() {
    let fixture = Fixture::start("unknown");
    let (_tls, record) = fixture.connect();

    let mut stranger = record.clone();
    stranger.client_id = record.client_id + 1000;
    uplink_socket()
        .send_to(&stranger.encode(), fixture.udp)
        .unwrap();
    assert!(fixture.next_message(Duration::from_millis(300)).is_none());
}

#[test]
fn test_unknown_tag_tears_down_session() {
    let fixture = Fixture::start("tag");
    let (mut tls, record) = fixture.connect();

    tls.write_all(&99u32.to_be_bytes()).unwrap();
    tls.flush().unwrap();

    match fixture.next_message(Duration::from_secs(5)) {
        Some(Message::NetcomClientDead { client_id }) => assert_eq!(client_id, record.client_id),
        other => panic!("expected NetcomClientDead, got {:?}", other),
    }
}

#[test]
fn test_peer_close_reports_dead_client() {
    let fixture = Fixture::start("close");
    let (mut tls, record) = fixture.connect();

    tls.conn.send_close_notify();
    tls.flush().unwrap();
    drop(tls);

    match fixture.next_message(Duration::from_secs(5)) {
        Some(Message::NetcomClientDead { client_id }) => assert_eq!(client_id, record.client_id),
        other => panic!("expected NetcomClientDead, got {:?}", other),
    }
}

#[test]
fn test_untrusted_client_gets_nothing() {
    let fixture = Fixture::start("untrusted");

    // 不信任服务端证书的客户端握手失败，服务端不产生任何消息
    let other = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let mut roots = RootCertStore::empty();
    roots.add(other.cert.der().clone()).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    let sock = TcpStream::connect(fixture.tcp).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let conn = ClientConnection::new(Arc::new(config), name).unwrap();
    let mut tls = StreamOwned::new(conn, sock);

    let mut buf = [0u8; CONNECT_RECORD_LEN];
    assert!(tls.read_exact(&mut buf).is_err());
    assert!(fixture.next_message(Duration::from_millis(300)).is_none());
}

#[test]
fn test_control_burst_larger_than_tls_buffer() {
    let fixture = Fixture::start("burst");
    let (mut tls, _record) = fixture.connect();

    // 40 KiB 明文，超过 rustls 默认接收缓冲
    const COUNT: usize = 10_000;
    let burst: Vec<u8> = (0..COUNT)
        .flat_map(|_| ControlCommand::Heartbeat.encode())
        .collect();
    tls.write_all(&burst).unwrap();
    tls.flush().unwrap();

    let mut heartbeats = 0;
    while heartbeats < COUNT {
        match fixture.next_message(Duration::from_secs(5)) {
            Some(Message::Heartbeat) => heartbeats += 1,
            other => panic!("session dropped after {} heartbeats: {:?}", heartbeats, other),
        }
    }
    assert!(fixture.next_message(Duration::from_millis(200)).is_none());
}

#[test]
fn test_records_queued_during_stalled_handshake_survive() {
    let fixture = Fixture::start_with("stall", 300);
    let (mut tls, _record) = fixture.connect();

    // 不发 ClientHello 的连接让事件线程阻塞到握手超时
    let _silent = TcpStream::connect(fixture.tcp).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    const COUNT: usize = 10_000;
    for _ in 0..COUNT {
        tls.write_all(&ControlCommand::Heartbeat.encode()).unwrap();
    }
    tls.flush().unwrap();

    let mut heartbeats = 0;
    while heartbeats < COUNT {
        match fixture.next_message(Duration::from_secs(5)) {
            Some(Message::Heartbeat) => heartbeats += 1,
            other => panic!("session dropped after {} heartbeats: {:?}", heartbeats, other),
        }
    }
    // 超时的握手不产生任何消息
    assert!(fixture.next_message(Duration::from_millis(500)).is_none());
}
