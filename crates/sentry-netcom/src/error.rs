//! 网络层错误类型定义

use sentry_protocol::ProtocolError;
use thiserror::Error;

/// 网络层错误类型
#[derive(Error, Debug)]
pub enum NetcomError {
    /// TLS 库错误
    #[error("TLS error: {0}")]
    SslError(#[from] rustls::Error),

    /// 证书文件无法读取或不含证书
    #[error("Invalid certificate {path}: {reason}")]
    InvalidCertificate { path: String, reason: String },

    /// 私钥文件无法读取或不含私钥
    #[error("Invalid private key {path}: {reason}")]
    InvalidKey { path: String, reason: String },

    /// 私钥与证书不匹配
    #[error("Private key does not match certificate")]
    KeyCertMismatch,

    /// 客户端 CA 加载或校验器构建失败
    #[error("Client CA error: {0}")]
    ClientCaError(String),

    /// 监听套接字创建失败
    #[error("Socket error on {addr}: {source}")]
    SocketError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 摄像头错误
    #[error("Camera error: {0}")]
    Camera(String),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
