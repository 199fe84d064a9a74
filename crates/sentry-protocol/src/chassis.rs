//! 底盘串口记录
//!
//! 底盘 MCU 直接收发 C 结构体的原始字节（小端），每条记录后跟一个 `:` 分隔符。
//! 分隔符不做转义：负载内部出现 `:` 会提前结束一帧。

use crate::{Message, MessageType, ProtocolError, SensorReading, ensure_len};

/// 底盘上行传感器记录长度：`type u32, sensor u16, data u16`
pub const CHASSIS_SENSOR_RECORD_LEN: usize = 8;

/// 将发往底盘的消息编码为串口负载（不含分隔符）
///
/// 只有 `Move`、`Heartbeat`、`SensorRequest` 会转发给底盘，其余返回 `None`。
pub fn encode_chassis_command(msg: &Message) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(8);
    match msg {
        Message::Move(direction) => {
            out.extend_from_slice(&u32::from(MessageType::Move).to_le_bytes());
            out.extend_from_slice(&u32::from(*direction).to_le_bytes());
        },
        Message::Heartbeat | Message::SensorRequest => {
            out.extend_from_slice(&u32::from(msg.message_type()).to_le_bytes());
        },
        _ => return None,
    }
    Some(out)
}

/// 解析底盘上报的一帧传感器记录
pub fn decode_chassis_sensor(frame: &[u8]) -> Result<SensorReading, ProtocolError> {
    ensure_len(frame, CHASSIS_SENSOR_RECORD_LEN)?;
    let tag = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if tag != u32::from(MessageType::SensorData) {
        return Err(ProtocolError::UnexpectedType {
            expected: MessageType::SensorData,
            actual: tag,
        });
    }
    Ok(SensorReading {
        sensor: u16::from_le_bytes([frame[4], frame[5]]),
        data: u16::from_le_bytes([frame[6], frame[7]]),
    })
}
