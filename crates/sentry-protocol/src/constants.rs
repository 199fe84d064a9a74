//! 协议常量

/// 一次性口令长度（字节）
pub const OTP_LEN: usize = 512;

/// 会话对称密钥长度（字节）
pub const KEY_LEN: usize = 512;

/// 单个帧分片的最大负载（字节）
pub const MAX_FRAGMENT_SIZE: usize = 512;

/// 底盘串口帧分隔符
pub const SERIAL_DELIMITER: u8 = b':';

/// 底盘上行帧缓冲上限（一条传感器记录的大小）
pub const SERIAL_FRAME_MAX: usize = 8;

/// 一次性口令
pub type Otp = [u8; OTP_LEN];

/// 会话对称密钥
pub type SessionKey = [u8; KEY_LEN];
