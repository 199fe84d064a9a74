//! 分隔符成帧的串口链路
//!
//! 发送：负载后追加一个 `:`，一次写出。端口未打开时先懒打开。
//! 接收：独立读线程逐字节读取，遇到 `:` 交付一帧；缓冲超过上限的字节被丢弃，
//! 但仍继续扫描分隔符。读线程通过取消令牌停止，`poll` 超时是取消检查点。

use crate::ChassisError;
use crate::device::{PortOpener, SerialDevice};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use sentry_actor::{Actor, ActorContext, Mailbox, Worker};
use sentry_protocol::{Message, SERIAL_DELIMITER, SERIAL_FRAME_MAX, decode_chassis_sensor};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 读线程的取消检查周期
const READ_POLL_INTERVAL_MS: u16 = 100;

/// 读错误或对端关闭后的退避时间
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// 成帧
// ============================================================================

/// 入站帧累加器
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameAccumulator {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len),
            max_len,
        }
    }

    /// 追加一个字节；遇到分隔符时返回完整的负载（不含分隔符）
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == SERIAL_DELIMITER {
            return Some(std::mem::replace(
                &mut self.buf,
                Vec::with_capacity(self.max_len),
            ));
        }
        if self.buf.len() < self.max_len {
            self.buf.push(byte);
        }
        None
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(SERIAL_FRAME_MAX)
    }
}

/// 编码一帧出站数据：负载 + 分隔符
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(SERIAL_DELIMITER);
    out
}

// ============================================================================
// 读线程
// ============================================================================

/// 串口读线程，把传感器帧投递到调度器邮箱
struct FrameReader {
    device: Box<dyn SerialDevice>,
    frames: FrameAccumulator,
    sink: Arc<Mailbox>,
}

impl FrameReader {
    fn deliver(&self, frame: &[u8]) {
        match decode_chassis_sensor(frame) {
            Ok(reading) => {
                trace!("Chassis sensor {} = {}", reading.sensor, reading.data);
                self.sink.push(Message::SensorData(reading));
            },
            Err(e) => warn!("Dropping chassis frame ({} bytes): {}", frame.len(), e),
        }
    }
}

impl Actor for FrameReader {
    fn run(&mut self, ctx: &ActorContext) {
        let fd = self.device.as_raw_fd();
        let mut byte = [0u8; 1];

        while !ctx.is_cancelled() {
            // SAFETY: fd 由 self.device 持有，在本循环期间有效
            let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
            match poll(&mut [pollfd], PollTimeout::from(READ_POLL_INTERVAL_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {},
                Err(e) => {
                    warn!("Serial poll failed: {}", e);
                    std::thread::sleep(READ_ERROR_BACKOFF);
                    continue;
                },
            }

            match self.device.read(&mut byte) {
                Ok(0) => {
                    debug!("Serial port reported end of stream");
                    std::thread::sleep(READ_ERROR_BACKOFF);
                },
                Ok(_) => {
                    if let Some(frame) = self.frames.push(byte[0]) {
                        self.deliver(&frame);
                    }
                },
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {},
                Err(e) => {
                    warn!("{}", ChassisError::ReadError(e));
                    std::thread::sleep(READ_ERROR_BACKOFF);
                },
            }
        }
    }
}

// ============================================================================
// 链路
// ============================================================================

/// 底盘串口链路：出站写 + 入站读线程
pub struct SerialLink {
    opener: Box<dyn PortOpener>,
    port: Option<Box<dyn SerialDevice>>,
    reader: Option<Worker>,
    sink: Arc<Mailbox>,
}

impl SerialLink {
    /// 创建链路（不打开端口）
    ///
    /// `sink` 是入站传感器帧的去向（调度器邮箱）。
    pub fn new(opener: Box<dyn PortOpener>, sink: Arc<Mailbox>) -> Self {
        Self {
            opener,
            port: None,
            reader: None,
            sink,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// 打开端口并启动读线程；已打开时为空操作
    pub fn open(&mut self) -> Result<(), ChassisError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = self.opener.open()?;
        let rx = port
            .try_clone_device()
            .map_err(|source| ChassisError::PortError {
                path: self.opener.describe(),
                source,
            })?;

        let mut reader = Worker::new(
            "chmgr-rx",
            FrameReader {
                device: rx,
                frames: FrameAccumulator::default(),
                sink: Arc::clone(&self.sink),
            },
        );
        reader.start()?;

        self.port = Some(port);
        self.reader = Some(reader);
        info!("Serial port {} open", self.opener.describe());
        Ok(())
    }

    /// 发送一帧
    ///
    /// 写失败时关闭端口，下一次发送会重新打开。
    pub fn send(&mut self, payload: &[u8]) -> Result<(), ChassisError> {
        self.open()?;
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };

        let frame = frame_payload(payload);
        let result = port.write_all(&frame).and_then(|_| port.flush());
        if let Err(e) = result {
            self.close();
            return Err(ChassisError::WriteError(e));
        }
        trace!("Wrote {} bytes to chassis", frame.len());
        Ok(())
    }

    /// 停止读线程并关闭端口
    pub fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        if self.port.take().is_some() {
            info!("Serial port {} closed", self.opener.describe());
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_splits_on_delimiter() {
        let mut acc = FrameAccumulator::new(8);
        assert_eq!(acc.push(1), None);
        assert_eq!(acc.push(2), None);
        assert_eq!(acc.push(b':'), Some(vec![1, 2]));
        assert_eq!(acc.push(b':'), Some(vec![]));
    }

    #[test]
    fn test_accumulator_caps_frame_length() {
        let mut acc = FrameAccumulator::new(4);
        for b in 0..10u8 {
            assert_eq!(acc.push(b), None);
        }
        assert_eq!(acc.push(b':'), Some(vec![0, 1, 2, 3]));
        // 下一帧从空缓冲开始
        assert_eq!(acc.push(9), None);
        assert_eq!(acc.push(b':'), Some(vec![9]));
    }

    #[test]
    fn test_embedded_delimiter_truncates_frame() {
        // 负载中的 0x3A 不转义
        let mut acc = FrameAccumulator::default();
        let payload = [6u8, 0, 0, 0, 1, 0, 0x3A, 0];
        let frames: Vec<Vec<u8>> = payload
            .iter()
            .chain(std::iter::once(&b':'))
            .filter_map(|b| acc.push(*b))
            .collect();
        assert_eq!(frames, vec![vec![6, 0, 0, 0, 1, 0], vec![0]]);
    }

    #[test]
    fn test_frame_payload_appends_delimiter() {
        assert_eq!(frame_payload(&[10, 0, 0, 0]), vec![10, 0, 0, 0, b':']);
    }
}
