//! 网络服务端
//!
//! 单线程就绪循环同时等待 TCP 监听、UDP 监听与全部控制通道。
//! 套接字以 `SourceFd` 注册到 mio（边沿触发），每次就绪都读到 `WouldBlock` 为止。
//! 停止时由取消令牌唤醒 `Waker`。

use crate::session::{ControlSession, HandshakeReject, random_key, random_otp};
use crate::{NetcomConfig, NetcomError, tls};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use rustls::{ServerConfig, ServerConnection};
use sentry_actor::{Actor, ActorContext, Mailbox};
use sentry_protocol::{ConnectRecord, KeyRecord, Message, UplinkSession};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const WAKER: Token = Token(usize::MAX);
const LISTENER: Token = Token(usize::MAX - 1);
const DATAGRAM: Token = Token(usize::MAX - 2);

/// 单个 UDP 数据报接收缓冲
const DATAGRAM_BUF_LEN: usize = 2048;

/// 网络服务端 actor（无邮箱，靠取消令牌停止）
pub struct NetcomServer {
    tls: Arc<ServerConfig>,
    listener: TcpListener,
    datagram: Arc<UdpSocket>,
    poll: Poll,
    waker: Arc<Waker>,
    sessions: HashMap<i32, ControlSession>,
    handshake_timeout: Duration,
    sink: Arc<Mailbox>,
}

impl NetcomServer {
    /// 加载 TLS 上下文并绑定 TCP/UDP 监听
    ///
    /// UDP 与 TCP 使用同一端口；端口配置为 0 时 UDP 跟随 TCP 实际分到的端口。
    pub fn bind(config: &NetcomConfig, sink: Arc<Mailbox>) -> Result<Self, NetcomError> {
        let tls = tls::server_config(config)?;

        let addr = format!("{}:{}", config.bind, config.port);
        let socket_error = |addr: &str, source: io::Error| NetcomError::SocketError {
            addr: addr.to_string(),
            source,
        };

        let listener = TcpListener::bind(&addr).map_err(|e| socket_error(&addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| socket_error(&addr, e))?;
        let tcp_addr = listener.local_addr()?;

        let udp_addr = SocketAddr::new(tcp_addr.ip(), tcp_addr.port());
        let datagram = UdpSocket::bind(udp_addr).map_err(|e| socket_error(&addr, e))?;
        datagram
            .set_nonblocking(true)
            .map_err(|e| socket_error(&addr, e))?;

        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )?;
        poll.registry().register(
            &mut SourceFd(&datagram.as_raw_fd()),
            DATAGRAM,
            Interest::READABLE,
        )?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        info!("Netcom listening on {} (TCP + UDP)", tcp_addr);

        Ok(Self {
            tls,
            listener,
            datagram: Arc::new(datagram),
            poll,
            waker,
            sessions: HashMap::new(),
            handshake_timeout: config.handshake_timeout(),
            sink,
        })
    }

    /// `(TCP, UDP)` 实际监听地址
    pub fn local_addrs(&self) -> io::Result<(SocketAddr, SocketAddr)> {
        Ok((self.listener.local_addr()?, self.datagram.local_addr()?))
    }

    /// 当前控制会话数
    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }

    // ------------------------------------------------------------------------
    // 控制通道
    // ------------------------------------------------------------------------

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.accept(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    break;
                },
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let client_id = stream.as_raw_fd();
        debug!(client_id, %peer, "Control connection accepted");

        let session = match self.handshake(stream, peer) {
            Ok(session) => session,
            Err(e) => {
                // 不向客户端说明原因
                warn!(%peer, "TLS handshake rejected: {}", e);
                return;
            },
        };

        if let Err(e) = self.poll.registry().register(
            &mut SourceFd(&client_id),
            Token(client_id as usize),
            Interest::READABLE,
        ) {
            error!(client_id, "Failed to register control channel: {}", e);
            return;
        }

        info!(client_id, %peer, "Client connected");
        self.sessions.insert(client_id, session);
        // 握手期间到达的数据不会再触发边沿事件
        self.service(client_id);
    }

    /// 阻塞完成 TLS 握手并下发 `NetcomConnect`
    ///
    /// 握手在事件线程上进行：一个不说话的客户端会让其他控制通道和 UDP 握手
    /// 最多停顿 `handshake_timeout`。期间积压的控制记录在下一次 `service` 中一并读出。
    fn handshake(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<ControlSession> {
        let client_id = stream.as_raw_fd();
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.handshake_timeout))?;
        stream.set_write_timeout(Some(self.handshake_timeout))?;

        let mut conn = ServerConnection::new(Arc::clone(&self.tls)).map_err(io::Error::other)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut stream)?;
        }

        let otp = random_otp();
        let record = ConnectRecord {
            client_id,
            otp: *otp,
        };
        let mut session = ControlSession::new(client_id, peer, conn, stream, otp);
        session.send_record(&record.encode())?;
        Ok(session)
    }

    fn service(&mut self, client_id: i32) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        let received = session.receive();
        for command in received.commands {
            let msg = command.into_message(client_id);
            debug!(client_id, "Control message {}", msg);
            self.sink.push(msg);
        }
        if let Some(reason) = received.closed {
            self.teardown(client_id, &reason);
        }
    }

    fn teardown(&mut self, client_id: i32, reason: &str) {
        let Some(mut session) = self.sessions.remove(&client_id) else {
            return;
        };
        let fd: RawFd = session.stream().as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(client_id, "Deregister failed: {}", e);
        }
        session.close();
        info!(client_id, peer = %session.name, "Client disconnected: {}", reason);
        self.sink.push(Message::NetcomClientDead { client_id });
    }

    // ------------------------------------------------------------------------
    // 上行握手
    // ------------------------------------------------------------------------

    fn receive_datagrams(&mut self) {
        let mut buf = [0u8; DATAGRAM_BUF_LEN];
        loop {
            match self.datagram.recv_from(&mut buf) {
                Ok((n, src)) => {
                    trace!(%src, "Datagram of {} bytes", n);
                    match ConnectRecord::decode(&buf[..n]) {
                        Ok(record) => self.uplink_handshake(record, src),
                        Err(e) => warn!(%src, "Ignoring datagram: {}", e),
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    break;
                },
            }
        }
    }

    fn uplink_handshake(&mut self, record: ConnectRecord, src: SocketAddr) {
        let client_id = record.client_id;
        let result = self
            .sessions
            .get(&client_id)
            .ok_or(HandshakeReject::UnknownClient)
            .and_then(|session| session.binding.check(&record.otp));
        if let Err(reject) = result {
            warn!(client_id, %src, "Uplink handshake rejected: {}", reject);
            return;
        }

        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };
        let key = random_key();
        if let Err(e) = session.send_record(&KeyRecord { key: *key }.encode()) {
            self.teardown(client_id, &format!("key delivery failed: {}", e));
            return;
        }
        if let Err(reject) = session.binding.bind(src) {
            warn!(client_id, %src, "Uplink handshake rejected: {}", reject);
            return;
        }

        info!(client_id, %src, "Uplink bound");
        self.sink
            .push(Message::NetcomClientAlive(Box::new(UplinkSession {
                client_id,
                name: session.name.clone(),
                peer: src,
                key,
                socket: Arc::clone(&self.datagram),
            })));
    }

    fn shutdown(&mut self) {
        for (client_id, mut session) in self.sessions.drain() {
            let fd = session.stream().as_raw_fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            session.close();
            debug!(client_id, "Control channel closed");
        }
        info!("Netcom stopped");
    }
}

impl Actor for NetcomServer {
    fn run(&mut self, ctx: &ActorContext) {
        let waker = Arc::clone(&self.waker);
        ctx.cancel_token().on_cancel(move || {
            let _ = waker.wake();
        });

        let mut events = Events::with_capacity(128);
        info!("Starting {} loop", ctx.name());

        while !ctx.is_cancelled() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("Readiness wait failed: {}", e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER => {},
                    LISTENER => self.accept_all(),
                    DATAGRAM => self.receive_datagrams(),
                    Token(fd) => self.service(fd as i32),
                }
            }
        }

        self.shutdown();
    }
}
