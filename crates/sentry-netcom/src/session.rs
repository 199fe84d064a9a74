//! 控制会话
//!
//! 每个通过 TLS 握手的客户端对应一个 `ControlSession`：控制通道、accept 时生成的 OTP，
//! 以及上行绑定状态（UDP 握手成功后记录对端地址，之后不再变化）。

use rand::RngCore;
use rand::rngs::OsRng;
use rustls::ServerConnection;
use sentry_protocol::{ControlCommand, KEY_LEN, OTP_LEN, Otp, SessionKey};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use thiserror::Error;

/// 生成随机一次性口令
pub fn random_otp() -> Box<Otp> {
    let mut otp = Box::new([0u8; OTP_LEN]);
    OsRng.fill_bytes(&mut otp[..]);
    otp
}

/// 生成随机会话密钥
pub fn random_key() -> Box<SessionKey> {
    let mut key = Box::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

// ============================================================================
// OTP 绑定
// ============================================================================

/// UDP 握手被拒绝的原因（只记录日志，不回告客户端）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReject {
    #[error("unknown client")]
    UnknownClient,
    #[error("uplink already bound")]
    AlreadyBound,
    #[error("OTP mismatch")]
    OtpMismatch,
}

/// OTP 与上行绑定状态
pub struct OtpBinding {
    otp: Box<Otp>,
    peer: Option<SocketAddr>,
}

impl OtpBinding {
    pub fn new(otp: Box<Otp>) -> Self {
        Self { otp, peer: None }
    }

    pub fn otp(&self) -> &Otp {
        &self.otp
    }

    /// 已绑定的上行对端地址
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_bound(&self) -> bool {
        self.peer.is_some()
    }

    /// 校验客户端回送的 OTP，不改变状态
    pub fn check(&self, offered: &Otp) -> Result<(), HandshakeReject> {
        if self.is_bound() {
            return Err(HandshakeReject::AlreadyBound);
        }
        if self.otp[..] != offered[..] {
            return Err(HandshakeReject::OtpMismatch);
        }
        Ok(())
    }

    /// 绑定上行地址；已绑定时返回 `AlreadyBound` 且不改变状态
    pub fn bind(&mut self, peer: SocketAddr) -> Result<(), HandshakeReject> {
        if self.is_bound() {
            return Err(HandshakeReject::AlreadyBound);
        }
        self.peer = Some(peer);
        Ok(())
    }
}

// ============================================================================
// 控制会话
// ============================================================================

/// 一次读取的结果
#[derive(Debug, Default)]
pub struct Received {
    /// 按到达顺序解码出的命令
    pub commands: Vec<ControlCommand>,
    /// 通道需要关闭时的原因
    pub closed: Option<String>,
}

/// 一个已认证的控制通道
pub struct ControlSession {
    pub client_id: i32,
    /// `ip:port`
    pub name: String,
    pub binding: OtpBinding,
    conn: ServerConnection,
    stream: TcpStream,
    plaintext: Vec<u8>,
}

impl ControlSession {
    /// 包装一个已完成 TLS 握手的连接，此后流处于非阻塞模式
    pub fn new(
        client_id: i32,
        peer: SocketAddr,
        conn: ServerConnection,
        stream: TcpStream,
        otp: Box<Otp>,
    ) -> Self {
        Self {
            client_id,
            name: peer.to_string(),
            binding: OtpBinding::new(otp),
            conn,
            stream,
            plaintext: Vec::new(),
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// 读空套接字，解密并切分控制记录
    pub fn receive(&mut self) -> Received {
        let mut received = Received::default();

        // 握手阶段可能已缓存明文
        if let Some(reason) = self.drain_plaintext() {
            received.closed = Some(reason);
        }

        while received.closed.is_none() {
            match self.conn.read_tls(&mut self.stream) {
                Ok(0) => {
                    received.closed = Some("connection closed by peer".to_string());
                },
                Ok(_) => {
                    if let Err(e) = self.conn.process_new_packets() {
                        // 尽量把告警发给对端
                        let _ = self.conn.write_tls(&mut self.stream);
                        received.closed = Some(format!("TLS error: {}", e));
                        return received;
                    }
                    // 每批都取走明文，否则 rustls 的接收缓冲满后 read_tls 报错
                    if let Some(reason) = self.drain_plaintext() {
                        received.closed = Some(reason);
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    received.closed = Some(format!("read error: {}", e));
                },
            }
        }

        let mut consumed = 0;
        loop {
            match ControlCommand::decode(&self.plaintext[consumed..]) {
                Ok(Some((cmd, len))) => {
                    received.commands.push(cmd);
                    consumed += len;
                },
                Ok(None) => break,
                Err(e) => {
                    received.closed = Some(format!("bad control record: {}", e));
                    break;
                },
            }
        }
        self.plaintext.drain(..consumed);

        // 处理记录可能产生待发数据（如密钥更新）
        if self.conn.wants_write() {
            let _ = self.flush_nonblocking();
        }
        received
    }

    /// 把已解密的数据移入 `plaintext`；对端结束时返回原因
    fn drain_plaintext(&mut self) -> Option<String> {
        let mut buf = [0u8; 4096];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => return Some("close_notify received".to_string()),
                Ok(n) => self.plaintext.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => return Some(format!("read error: {}", e)),
            }
        }
    }

    /// 发送一条记录，阻塞直到写完或写超时
    pub fn send_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.conn.writer().write_all(record)?;
        self.stream.set_nonblocking(false)?;
        let result = self.flush_blocking();
        self.stream.set_nonblocking(true)?;
        result
    }

    fn flush_blocking(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(())
    }

    fn flush_nonblocking(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.stream) {
                Ok(_) => {},
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 发送 close_notify 并尽力写出
    pub fn close(&mut self) {
        self.conn.send_close_notify();
        let _ = self.flush_nonblocking();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[test]
    fn test_correct_otp_binds_once() {
        let otp = random_otp();
        let offered = otp.clone();
        let mut binding = OtpBinding::new(otp);

        assert!(!binding.is_bound());
        assert_eq!(binding.check(&offered), Ok(()));
        binding.bind(peer()).unwrap();
        assert_eq!(binding.peer(), Some(peer()));

        // 重复握手被拒绝，状态不变
        assert_eq!(binding.check(&offered), Err(HandshakeReject::AlreadyBound));
        let other: SocketAddr = "198.51.100.1:1".parse().unwrap();
        assert_eq!(binding.bind(other), Err(HandshakeReject::AlreadyBound));
        assert_eq!(binding.peer(), Some(peer()));
    }

    #[test]
    fn test_wrong_otp_rejected_without_state_change() {
        let otp = random_otp();
        let mut wrong = otp.clone();
        wrong[OTP_LEN - 1] ^= 0x01;
        let binding = OtpBinding::new(otp);

        assert_eq!(binding.check(&wrong), Err(HandshakeReject::OtpMismatch));
        assert!(!binding.is_bound());
    }

    #[test]
    fn test_random_values_differ() {
        // 两次 512 字节随机值相同的概率可以忽略
        assert_ne!(random_otp()[..], random_otp()[..]);
        assert_ne!(random_key()[..], random_key()[..]);
    }
}
