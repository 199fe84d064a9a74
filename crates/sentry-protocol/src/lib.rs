//! # Sentry Protocol
//!
//! 遥操作机器人服务端的消息模型与线格式编解码（无 I/O 依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（OTP/密钥长度、分片上限、串口分隔符）
//! - `message`: 进程内消息类型 `Message` 及其枚举
//! - `control`: TLS 控制通道记录（网络字节序）
//! - `uplink`: UDP 上行数据报、分片与 XOR 混淆
//! - `chassis`: 底盘串口记录（底盘本机小端布局）
//! - `session`: 上行会话句柄 `UplinkSession`
//!
//! ## 字节序
//!
//! 网络上的多字节整数一律为大端字节序；进入进程后为主机字节序。
//! 底盘串口使用底盘 MCU 的小端结构体布局。

pub mod chassis;
pub mod constants;
pub mod control;
pub mod message;
pub mod session;
pub mod uplink;

pub use chassis::*;
pub use constants::*;
pub use control::*;
pub use message::*;
pub use session::*;
pub use uplink::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid record length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownType(u32),

    #[error("Unexpected message type {actual} (expected {expected})")]
    UnexpectedType { expected: MessageType, actual: u32 },

    #[error("Invalid move direction: {0}")]
    InvalidDirection(u32),

    #[error("Frame too large: {size} bytes does not fit in {max_fragments} fragments")]
    FrameTooLarge { size: usize, max_fragments: usize },
}

/// 从缓冲区指定偏移读取大端 u32
///
/// 调用方负责保证 `buf.len() >= offset + 4`。
pub(crate) fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(raw)
}

/// 从缓冲区指定偏移读取大端 u16
pub(crate) fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_be_bytes(raw)
}

/// 长度检查，不足时返回 `InvalidLength`
pub(crate) fn ensure_len(buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_be_at_offset() {
        let buf = [0xAA, 0x12, 0x34, 0x56, 0x78];
        assert_eq!(read_u32_be(&buf, 1), 0x12345678);
    }

    #[test]
    fn test_read_u16_be() {
        assert_eq!(read_u16_be(&[0x01, 0x02], 0), 0x0102);
    }

    #[test]
    fn test_ensure_len_reports_sizes() {
        let err = ensure_len(&[0u8; 3], 4).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 4,
                actual: 3
            }
        );
        assert!(ensure_len(&[0u8; 4], 4).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownType(99);
        assert_eq!(err.to_string(), "Unknown message type: 99");
    }
}
