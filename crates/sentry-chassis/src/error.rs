//! 底盘链路错误类型定义

use sentry_actor::ActorError;
use thiserror::Error;

/// 底盘链路错误类型
#[derive(Error, Debug)]
pub enum ChassisError {
    /// 串口打开或配置失败
    #[error("Serial port {path} error: {source}")]
    PortError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 不支持的波特率
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    /// 串口读错误
    #[error("Serial read error: {0}")]
    ReadError(#[source] std::io::Error),

    /// 串口写错误
    #[error("Serial write error: {0}")]
    WriteError(#[source] std::io::Error),

    /// 读线程创建失败
    #[error(transparent)]
    Thread(#[from] ActorError),
}
