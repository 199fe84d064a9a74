//! TLS 控制通道记录
//!
//! 控制通道上的每条记录以 `{type:u32}` 开头，长度由类型决定，没有自描述长度前缀。
//! TLS 会话不向应用层暴露记录边界，因此解码器按类型推算长度并从累积缓冲区中切分。
//!
//! | 记录 | 方向 | 布局（大端） | 长度 |
//! |---|---|---|---|
//! | Terminate / SearchRemote / SensorRequest / Heartbeat / CameraRequest | 客户端 → 服务端 | `type` | 4 |
//! | Move | 客户端 → 服务端 | `type, direction` | 8 |
//! | NetcomConnect | 服务端 → 客户端（TLS），客户端 → 服务端（UDP） | `type, id, otp[512]` | 520 |
//! | NetcomKey | 服务端 → 客户端 | `type, key[512]` | 516 |

use crate::{
    KEY_LEN, Message, MessageType, MoveDirection, OTP_LEN, Otp, ProtocolError, SessionKey,
    ensure_len, read_u32_be,
};

/// 记录头长度
pub const HEADER_LEN: usize = 4;

/// `NetcomConnect` 记录长度
pub const CONNECT_RECORD_LEN: usize = HEADER_LEN + 4 + OTP_LEN;

/// `NetcomKey` 记录长度
pub const KEY_RECORD_LEN: usize = HEADER_LEN + KEY_LEN;

/// `Move` 记录长度
pub const MOVE_RECORD_LEN: usize = HEADER_LEN + 4;

// ============================================================================
// 客户端命令
// ============================================================================

/// 客户端经控制通道发送的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Terminate,
    SearchRemote,
    SensorRequest,
    Heartbeat,
    CameraRequest,
    Move(MoveDirection),
}

impl ControlCommand {
    /// 给定标签对应的记录长度；不支持的标签返回 `None`
    pub fn record_len(tag: u32) -> Option<usize> {
        match MessageType::from_raw(tag)? {
            MessageType::Terminate
            | MessageType::SearchRemote
            | MessageType::SensorRequest
            | MessageType::Heartbeat
            | MessageType::CameraRequest => Some(HEADER_LEN),
            MessageType::Move => Some(MOVE_RECORD_LEN),
            _ => None,
        }
    }

    /// 从累积缓冲区头部解码一条命令
    ///
    /// 返回 `Ok(None)` 表示数据不足，需要继续读取；
    /// 返回 `Ok(Some((cmd, consumed)))` 表示成功解码并消费了 `consumed` 字节。
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let tag = read_u32_be(buf, 0);
        let len = Self::record_len(tag).ok_or(ProtocolError::UnknownType(tag))?;
        if buf.len() < len {
            return Ok(None);
        }

        let cmd = match MessageType::from_raw(tag) {
            Some(MessageType::Terminate) => ControlCommand::Terminate,
            Some(MessageType::SearchRemote) => ControlCommand::SearchRemote,
            Some(MessageType::SensorRequest) => ControlCommand::SensorRequest,
            Some(MessageType::Heartbeat) => ControlCommand::Heartbeat,
            Some(MessageType::CameraRequest) => ControlCommand::CameraRequest,
            Some(MessageType::Move) => {
                let raw = read_u32_be(buf, HEADER_LEN);
                let direction =
                    MoveDirection::from_raw(raw).ok_or(ProtocolError::InvalidDirection(raw))?;
                ControlCommand::Move(direction)
            },
            _ => return Err(ProtocolError::UnknownType(tag)),
        };
        Ok(Some((cmd, len)))
    }

    /// 编码为控制通道记录
    pub fn encode(&self) -> Vec<u8> {
        let tag = match self {
            ControlCommand::Terminate => MessageType::Terminate,
            ControlCommand::SearchRemote => MessageType::SearchRemote,
            ControlCommand::SensorRequest => MessageType::SensorRequest,
            ControlCommand::Heartbeat => MessageType::Heartbeat,
            ControlCommand::CameraRequest => MessageType::CameraRequest,
            ControlCommand::Move(_) => MessageType::Move,
        };
        let mut out = Vec::with_capacity(MOVE_RECORD_LEN);
        out.extend_from_slice(&u32::from(tag).to_be_bytes());
        if let ControlCommand::Move(direction) = self {
            out.extend_from_slice(&u32::from(*direction).to_be_bytes());
        }
        out
    }

    /// 转换为发往调度器的消息，`CameraRequest` 附加客户端标识
    pub fn into_message(self, client_id: i32) -> Message {
        match self {
            ControlCommand::Terminate => Message::Terminate,
            ControlCommand::SearchRemote => Message::SearchRemote,
            ControlCommand::SensorRequest => Message::SensorRequest,
            ControlCommand::Heartbeat => Message::Heartbeat,
            ControlCommand::CameraRequest => Message::CameraRequest { client_id },
            ControlCommand::Move(direction) => Message::Move(direction),
        }
    }
}

// ============================================================================
// 会话建立记录
// ============================================================================

/// `NetcomConnect`：客户端标识 + 一次性口令
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRecord {
    pub client_id: i32,
    pub otp: Otp,
}

impl std::fmt::Debug for ConnectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRecord")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ConnectRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONNECT_RECORD_LEN);
        out.extend_from_slice(&u32::from(MessageType::NetcomConnect).to_be_bytes());
        out.extend_from_slice(&(self.client_id as u32).to_be_bytes());
        out.extend_from_slice(&self.otp);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(buf, CONNECT_RECORD_LEN)?;
        let tag = read_u32_be(buf, 0);
        if tag != u32::from(MessageType::NetcomConnect) {
            return Err(ProtocolError::UnexpectedType {
                expected: MessageType::NetcomConnect,
                actual: tag,
            });
        }
        let client_id = read_u32_be(buf, HEADER_LEN) as i32;
        let mut otp = [0u8; OTP_LEN];
        otp.copy_from_slice(&buf[HEADER_LEN + 4..CONNECT_RECORD_LEN]);
        Ok(Self { client_id, otp })
    }
}

/// `NetcomKey`：会话对称密钥
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: SessionKey,
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord").finish_non_exhaustive()
    }
}

impl KeyRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_RECORD_LEN);
        out.extend_from_slice(&u32::from(MessageType::NetcomKey).to_be_bytes());
        out.extend_from_slice(&self.key);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(buf, KEY_RECORD_LEN)?;
        let tag = read_u32_be(buf, 0);
        if tag != u32::from(MessageType::NetcomKey) {
            return Err(ProtocolError::UnexpectedType {
                expected: MessageType::NetcomKey,
                actual: tag,
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&buf[HEADER_LEN..KEY_RECORD_LEN]);
        Ok(Self { key })
    }
}
