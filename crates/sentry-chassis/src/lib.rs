//! # Sentry Chassis
//!
//! 底盘串口链路
//!
//! ## 模块
//!
//! - `device`: 串口设备抽象与 termios 配置
//! - `link`: `:` 分隔的帧收发、懒打开与读线程
//! - `manager`: 底盘管理 actor（用户计数、停车命令）
//!
//! ## 帧格式
//!
//! ```text
//! ┌──────────────────────┬─────┐
//! │ 负载（原始结构体字节）│ ':' │
//! └──────────────────────┴─────┘
//! ```
//!
//! 分隔符不转义。负载中出现 `0x3A` 会在接收端提前截断一帧。

pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod manager;

pub use config::ChassisConfig;
pub use device::{PortOpener, SerialDevice, TtyOpener};
pub use error::ChassisError;
pub use link::{FrameAccumulator, SerialLink};
pub use manager::ChassisLink;
