//! 进程内消息模型
//!
//! `Message` 是所有组件之间传递的封闭类型集合。消息按值移动：
//! 发送方交给邮箱，邮箱交给接收方，转发时所有权再次转移，不存在别名。

use crate::session::UplinkSession;
use crate::uplink::FrameFragment;
use crate::{ConnectRecord, KeyRecord};
use std::fmt;

// ============================================================================
// 枚举
// ============================================================================

/// 消息类型标签（线格式数值）
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
)]
#[repr(u32)]
pub enum MessageType {
    Invalid = 0,
    Terminate = 1,
    SearchRemote = 2,
    CameraRequest = 3,
    CameraFrame = 4,
    SensorRequest = 5,
    SensorData = 6,
    Move = 7,
    UserUp = 8,
    UserDown = 9,
    Heartbeat = 10,
    NetcomConnect = 11,
    NetcomKey = 12,
    NetcomClientAlive = 13,
    NetcomClientDead = 14,
}

impl MessageType {
    /// 从线格式数值解析
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::try_from(raw).ok()
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Invalid => "INVALID",
            MessageType::Terminate => "TERMINATE",
            MessageType::SearchRemote => "SEARCH_REMOTE",
            MessageType::CameraRequest => "CAMERA_REQUEST",
            MessageType::CameraFrame => "CAMERA_FRAME",
            MessageType::SensorRequest => "SENSOR_REQUEST",
            MessageType::SensorData => "SENSOR_DATA",
            MessageType::Move => "MOVE",
            MessageType::UserUp => "USER_UP",
            MessageType::UserDown => "USER_DOWN",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::NetcomConnect => "NETCOM_CONNECT",
            MessageType::NetcomKey => "NETCOM_KEY",
            MessageType::NetcomClientAlive => "NETCOM_CLIENT_ALIVE",
            MessageType::NetcomClientDead => "NETCOM_CLIENT_DEAD",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 运动方向
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
)]
#[repr(u32)]
pub enum MoveDirection {
    /// 停止（默认）
    #[default]
    Stop = 0,
    Forward = 1,
    Backward = 2,
    TurnLeft = 3,
    TurnRight = 4,
    /// 云台上仰
    RotateUp = 5,
    /// 云台下俯
    RotateDown = 6,
}

impl MoveDirection {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::try_from(raw).ok()
    }
}

/// 传感器种类
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
)]
#[repr(u16)]
pub enum SensorType {
    Invalid = 0,
    Distance = 1,
    Temperature = 2,
}

/// 一条传感器读数
///
/// `sensor` 保留底盘上报的原始编号，未知编号原样透传给客户端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub sensor: u16,
    pub data: u16,
}

impl SensorReading {
    pub fn new(sensor: SensorType, data: u16) -> Self {
        Self {
            sensor: sensor.into(),
            data,
        }
    }

    /// 已知的传感器种类
    pub fn kind(&self) -> Option<SensorType> {
        SensorType::try_from(self.sensor).ok()
    }
}

// ============================================================================
// 消息
// ============================================================================

/// 组件间消息
///
/// 大尺寸负载（分片、口令、密钥、会话）装箱，避免每条消息都携带 512 字节。
#[derive(Debug)]
pub enum Message {
    Terminate,
    SearchRemote,
    /// 客户端切换视频流；`client_id` 由网络服务端附加
    CameraRequest {
        client_id: i32,
    },
    CameraFrame(Box<FrameFragment>),
    SensorRequest,
    SensorData(SensorReading),
    Move(MoveDirection),
    UserUp,
    UserDown,
    Heartbeat,
    NetcomConnect(Box<ConnectRecord>),
    NetcomKey(Box<KeyRecord>),
    /// UDP 握手成功，携带已绑定的上行会话
    NetcomClientAlive(Box<UplinkSession>),
    NetcomClientDead {
        client_id: i32,
    },
}

impl Message {
    /// 消息标签
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Terminate => MessageType::Terminate,
            Message::SearchRemote => MessageType::SearchRemote,
            Message::CameraRequest { .. } => MessageType::CameraRequest,
            Message::CameraFrame(_) => MessageType::CameraFrame,
            Message::SensorRequest => MessageType::SensorRequest,
            Message::SensorData(_) => MessageType::SensorData,
            Message::Move(_) => MessageType::Move,
            Message::UserUp => MessageType::UserUp,
            Message::UserDown => MessageType::UserDown,
            Message::Heartbeat => MessageType::Heartbeat,
            Message::NetcomConnect(_) => MessageType::NetcomConnect,
            Message::NetcomKey(_) => MessageType::NetcomKey,
            Message::NetcomClientAlive(_) => MessageType::NetcomClientAlive,
            Message::NetcomClientDead { .. } => MessageType::NetcomClientDead,
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Message::Terminate)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.message_type();
        match self {
            Message::CameraRequest { client_id } | Message::NetcomClientDead { client_id } => {
                write!(f, "{} client={}", tag, client_id)
            },
            Message::CameraFrame(fragment) => write!(
                f,
                "{} {}x{} size={} frag={}/{}B",
                tag,
                fragment.header.cols,
                fragment.header.rows,
                fragment.header.frame_size,
                fragment.header.frag_seq,
                fragment.header.frag_size
            ),
            Message::SensorData(reading) => match reading.kind() {
                Some(kind) => write!(f, "{} {:?}={}", tag, kind, reading.data),
                None => write!(f, "{} sensor#{}={}", tag, reading.sensor, reading.data),
            },
            Message::Move(direction) => write!(f, "{} {:?}", tag, direction),
            Message::NetcomConnect(record) => write!(f, "{} client={}", tag, record.client_id),
            Message::NetcomClientAlive(session) => {
                write!(f, "{} client={} peer={}", tag, session.client_id, session.peer)
            },
            _ => write!(f, "{}", tag),
        }
    }
}
