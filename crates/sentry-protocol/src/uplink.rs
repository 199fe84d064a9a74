//! UDP 上行数据报
//!
//! ## 帧分片数据报（大端）
//!
//! ```text
//! ┌──────────┬────────────┬──────┬──────┬───────────┬──────────┬────────────────────┐
//! │ type u32 │ frame u32  │ cols │ rows │ frag_size │ frag_seq │ data[frag_size]    │
//! │          │ (总字节数) │ u16  │ u16  │ u16       │ u16 从 1 │ (≤ 512)            │
//! └──────────┴────────────┴──────┴──────┴───────────┴──────────┴────────────────────┘
//! ```
//!
//! ## 传感器数据报（大端）
//!
//! ```text
//! ┌──────────┬────────────┬──────────┐
//! │ type u32 │ sensor u16 │ data u16 │
//! └──────────┴────────────┴──────────┘
//! ```
//!
//! 帧数据在分片前经过重复密钥 XOR 混淆，密钥相位跨帧延续。

use crate::{
    MAX_FRAGMENT_SIZE, MessageType, ProtocolError, SensorReading, SessionKey, ensure_len,
    read_u16_be, read_u32_be,
};

/// 帧分片头长度
pub const FRAME_HEADER_LEN: usize = 16;

/// 传感器数据报长度
pub const SENSOR_DATAGRAM_LEN: usize = 8;

// ============================================================================
// 帧分片
// ============================================================================

/// 帧分片头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 整帧字节数
    pub frame_size: u32,
    pub cols: u16,
    pub rows: u16,
    /// 本分片负载字节数
    pub frag_size: u16,
    /// 分片序号，从 1 开始
    pub frag_seq: u16,
}

/// 一个帧分片（头 + 负载）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFragment {
    pub header: FrameHeader,
    pub data: Vec<u8>,
}

/// 编码帧分片数据报到 `out`（先清空）
pub fn encode_frame_datagram(header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&u32::from(MessageType::CameraFrame).to_be_bytes());
    out.extend_from_slice(&header.frame_size.to_be_bytes());
    out.extend_from_slice(&header.cols.to_be_bytes());
    out.extend_from_slice(&header.rows.to_be_bytes());
    out.extend_from_slice(&header.frag_size.to_be_bytes());
    out.extend_from_slice(&header.frag_seq.to_be_bytes());
    out.extend_from_slice(payload);
}

/// 解码帧分片数据报
pub fn decode_frame_datagram(buf: &[u8]) -> Result<FrameFragment, ProtocolError> {
    ensure_len(buf, FRAME_HEADER_LEN)?;
    let tag = read_u32_be(buf, 0);
    if tag != u32::from(MessageType::CameraFrame) {
        return Err(ProtocolError::UnexpectedType {
            expected: MessageType::CameraFrame,
            actual: tag,
        });
    }
    let header = FrameHeader {
        frame_size: read_u32_be(buf, 4),
        cols: read_u16_be(buf, 8),
        rows: read_u16_be(buf, 10),
        frag_size: read_u16_be(buf, 12),
        frag_seq: read_u16_be(buf, 14),
    };
    let end = FRAME_HEADER_LEN + header.frag_size as usize;
    ensure_len(buf, end)?;
    Ok(FrameFragment {
        header,
        data: buf[FRAME_HEADER_LEN..end].to_vec(),
    })
}

/// 帧分片迭代器
///
/// 对长度为 `N` 的帧按上限 `F` 产生 `ceil(N/F)` 个分片，序号 `1..=k` 连续。
/// 空帧不产生任何分片。
#[derive(Debug)]
pub struct Fragmenter<'a> {
    chunks: std::slice::Chunks<'a, u8>,
    next_seq: u16,
}

impl<'a> Fragmenter<'a> {
    /// 创建分片器
    ///
    /// `max_fragment` 会被限制在 `1..=MAX_FRAGMENT_SIZE`；
    /// 分片数量超过 `u16::MAX` 时返回 `FrameTooLarge`。
    pub fn new(frame: &'a [u8], max_fragment: usize) -> Result<Self, ProtocolError> {
        let size = max_fragment.clamp(1, MAX_FRAGMENT_SIZE);
        if frame.len().div_ceil(size) > u16::MAX as usize || frame.len() > u32::MAX as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max_fragments: u16::MAX as usize,
            });
        }
        Ok(Self {
            chunks: frame.chunks(size),
            next_seq: 1,
        })
    }

    /// 剩余分片数
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl<'a> Iterator for Fragmenter<'a> {
    /// `(序号, 负载)`
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Some((seq, chunk))
    }
}

// ============================================================================
// 传感器数据报
// ============================================================================

pub fn encode_sensor_datagram(reading: &SensorReading) -> [u8; SENSOR_DATAGRAM_LEN] {
    let mut out = [0u8; SENSOR_DATAGRAM_LEN];
    out[..4].copy_from_slice(&u32::from(MessageType::SensorData).to_be_bytes());
    out[4..6].copy_from_slice(&reading.sensor.to_be_bytes());
    out[6..8].copy_from_slice(&reading.data.to_be_bytes());
    out
}

pub fn decode_sensor_datagram(buf: &[u8]) -> Result<SensorReading, ProtocolError> {
    ensure_len(buf, SENSOR_DATAGRAM_LEN)?;
    let tag = read_u32_be(buf, 0);
    if tag != u32::from(MessageType::SensorData) {
        return Err(ProtocolError::UnexpectedType {
            expected: MessageType::SensorData,
            actual: tag,
        });
    }
    Ok(SensorReading {
        sensor: read_u16_be(buf, 4),
        data: read_u16_be(buf, 6),
    })
}

// ============================================================================
// XOR 混淆
// ============================================================================

/// 重复密钥 XOR 混淆
///
/// 密钥下标对密钥长度取模，相位在多次 `apply` 调用之间延续，不按帧重置。
/// 客户端解码必须以相同方式跟踪相位。同一密钥、同一起始相位应用两次即还原。
pub struct XorCipher {
    key: Box<SessionKey>,
    phase: usize,
}

impl XorCipher {
    pub fn new(key: Box<SessionKey>) -> Self {
        Self::with_phase(key, 0)
    }

    pub fn with_phase(key: Box<SessionKey>, phase: usize) -> Self {
        let phase = phase % key.len();
        Self { key, phase }
    }

    /// 当前密钥相位
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// 原地混淆，并推进相位
    pub fn apply(&mut self, buf: &mut [u8]) {
        let len = self.key.len();
        for byte in buf.iter_mut() {
            *byte ^= self.key[self.phase];
            self.phase = (self.phase + 1) % len;
        }
    }
}

impl std::fmt::Debug for XorCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorCipher")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
