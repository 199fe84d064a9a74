//! 共享摄像头
//!
//! 多个上行 actor 共享一台设备：第一个预约时打开，预约清零时关闭。
//! 预约表、设备与抓帧由同一把锁保护，并发抓帧不会在设备层交错。

use crate::{CameraConfig, NetcomError};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 帧源
///
/// 实现者负责采集与编码，`grab` 把一帧编码后的字节写入 `out`（先清空）。
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), NetcomError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<(), NetcomError>;
}

struct CameraState {
    source: Box<dyn FrameSource>,
    clients: Vec<i32>,
}

/// 预约计数的共享摄像头
pub struct Camera {
    state: Mutex<CameraState>,
    cols: u16,
    rows: u16,
}

impl Camera {
    pub fn new(source: Box<dyn FrameSource>, cols: u16, rows: u16) -> Self {
        Self {
            state: Mutex::new(CameraState {
                source,
                clients: Vec::new(),
            }),
            cols,
            rows,
        }
    }

    /// 使用内置测试图案源
    pub fn test_pattern(config: &CameraConfig) -> Self {
        Self::new(
            Box::new(TestPattern::new(config)),
            config.cols,
            config.rows,
        )
    }

    pub fn width(&self) -> u16 {
        self.cols
    }

    pub fn height(&self) -> u16 {
        self.rows
    }

    /// 当前预约数
    pub fn clients(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().source.is_open()
    }

    /// 预约摄像头，必要时打开设备
    ///
    /// 打开失败时不记录预约，返回 `false`。
    pub fn reserve(&self, client_id: i32) -> bool {
        let mut state = self.state.lock();
        if !state.source.is_open() {
            if let Err(e) = state.source.open() {
                warn!(client_id, "Failed to open camera: {}", e);
                return false;
            }
            info!("Camera opened ({}x{})", self.cols, self.rows);
        }
        state.clients.push(client_id);
        debug!(client_id, clients = state.clients.len(), "Camera reserved");
        true
    }

    /// 释放一次预约，预约清零时关闭设备
    pub fn release(&self, client_id: i32) {
        let mut state = self.state.lock();
        let Some(pos) = state.clients.iter().position(|&id| id == client_id) else {
            return;
        };
        state.clients.remove(pos);
        debug!(client_id, clients = state.clients.len(), "Camera released");

        if state.clients.is_empty() && state.source.is_open() {
            state.source.close();
            info!("Camera closed");
        }
    }

    /// 抓取一帧编码后的图像；设备关闭或抓帧失败时返回空缓冲
    pub fn capture_encoded_frame(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        let mut frame = Vec::new();
        if !state.source.is_open() {
            return frame;
        }
        if let Err(e) = state.source.grab(&mut frame) {
            warn!("Frame capture failed: {}", e);
            frame.clear();
        }
        frame
    }
}

// ============================================================================
// 测试图案源
// ============================================================================

/// 合成的移动渐变图案，按配置的质量编码为 JPEG
pub struct TestPattern {
    cols: u32,
    rows: u32,
    quality: u8,
    interval: Duration,
    open: bool,
    tick: u32,
    last: Option<Instant>,
}

impl TestPattern {
    pub fn new(config: &CameraConfig) -> Self {
        let fps = config.fps.max(1);
        Self {
            cols: u32::from(config.cols.max(1)),
            rows: u32::from(config.rows.max(1)),
            quality: config.quality.clamp(1, 100),
            interval: Duration::from_secs(1) / fps,
            open: false,
            tick: 0,
            last: None,
        }
    }

    fn render(&self) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        let shift = self.tick;
        let (cols, rows) = (self.cols, self.rows);
        ImageBuffer::from_fn(cols, rows, |x, y| {
            let r = ((x + shift) * 255 / cols) as u8;
            let g = (y * 255 / rows) as u8;
            let b = (shift.wrapping_mul(4) & 0xFF) as u8;
            Rgb([r, g, b])
        })
    }

    // 限制帧率
    fn pace(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

impl FrameSource for TestPattern {
    fn open(&mut self) -> Result<(), NetcomError> {
        self.open = true;
        self.tick = 0;
        self.last = None;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn grab(&mut self, out: &mut Vec<u8>) -> Result<(), NetcomError> {
        if !self.open {
            return Err(NetcomError::Camera("device closed".to_string()));
        }
        self.pace();

        let image = self.render();
        self.tick = (self.tick + 1) % self.cols;

        out.clear();
        JpegEncoder::new_with_quality(&mut *out, self.quality)
            .encode_image(&image)
            .map_err(|e| NetcomError::Camera(e.to_string()))?;
        Ok(())
    }
}
