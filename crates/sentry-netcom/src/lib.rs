//! # Sentry Netcom
//!
//! 客户端网络接入：TLS 控制通道、基于 OTP 的 UDP 上行握手、视频/传感器上行推流
//!
//! ## 模块
//!
//! - `config`: `[netcom]` 与 `[camera]` 配置段
//! - `tls`: 服务端 TLS 上下文（证书、私钥、可选客户端 CA）
//! - `session`: 控制会话与 OTP 绑定状态
//! - `server`: 单线程就绪循环（TCP 监听、UDP 监听、全部控制通道）
//! - `uplink`: 每客户端一个的上行 actor
//! - `camera`: 预约计数的共享摄像头
//!
//! ## 会话建立
//!
//! ```text
//! 客户端                                   服务端
//!   │ ── TCP connect + TLS 握手 ──────────────▶ │
//!   │ ◀──────────── NetcomConnect{id, otp} ──── │  (TLS)
//!   │ ── NetcomConnect{id, otp} ──────────────▶ │  (UDP，源地址即上行地址)
//!   │ ◀──────────────────── NetcomKey{key} ──── │  (TLS)
//!   │ ◀════════════ 帧分片 / 传感器数据 ═══════ │  (UDP)
//! ```

pub mod camera;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod tls;
pub mod uplink;

pub use camera::{Camera, FrameSource, TestPattern};
pub use config::{CameraConfig, NetcomConfig};
pub use error::NetcomError;
pub use server::NetcomServer;
pub use session::{HandshakeReject, OtpBinding};
pub use uplink::UplinkActor;
