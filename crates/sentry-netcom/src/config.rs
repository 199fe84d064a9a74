//! 网络与摄像头配置

use sentry_protocol::MAX_FRAGMENT_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// `[netcom]` 配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetcomConfig {
    /// 监听地址
    pub bind: String,
    /// TCP 与 UDP 共用端口
    pub port: u16,
    /// 服务端证书链（PEM）
    pub certfile: PathBuf,
    /// 服务端私钥（PEM）
    pub keyfile: PathBuf,
    /// 是否要求客户端证书
    pub force_auth: bool,
    /// 受信任的客户端 CA（PEM），`force_auth` 时必需
    pub clients: Option<PathBuf>,
    /// 控制通道握手与阻塞写的超时（毫秒）
    pub handshake_timeout_ms: u64,
    /// 帧分片负载上限（字节）
    pub max_fragment: usize,
}

impl NetcomConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// 分片上限，限制在 `1..=MAX_FRAGMENT_SIZE`
    pub fn fragment_size(&self) -> usize {
        self.max_fragment.clamp(1, MAX_FRAGMENT_SIZE)
    }
}

impl Default for NetcomConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            certfile: PathBuf::from("/etc/sentry/server.pem"),
            keyfile: PathBuf::from("/etc/sentry/server.key"),
            force_auth: false,
            clients: None,
            handshake_timeout_ms: 3000,
            max_fragment: MAX_FRAGMENT_SIZE,
        }
    }
}

/// `[camera]` 配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub cols: u16,
    pub rows: u16,
    /// JPEG 质量（1-100）
    pub quality: u8,
    /// 帧率上限
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            cols: 320,
            rows: 240,
            quality: 85,
            fps: 15,
        }
    }
}
