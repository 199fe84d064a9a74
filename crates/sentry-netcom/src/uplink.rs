//! 上行 actor
//!
//! 每个完成 UDP 握手的客户端一个。空闲时阻塞在邮箱上；推流时不等待，
//! 每轮先非阻塞地取空邮箱，再抓一帧、混淆、分片发送。

use crate::Camera;
use sentry_actor::{Actor, ActorContext};
use sentry_protocol::{
    FrameHeader, Fragmenter, Message, SensorReading, UplinkSession, XorCipher,
    encode_frame_datagram, encode_sensor_datagram,
};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 抓帧为空时的退避
const EMPTY_FRAME_BACKOFF: Duration = Duration::from_millis(20);

/// 上行 actor
pub struct UplinkActor {
    session: UplinkSession,
    cipher: XorCipher,
    camera: Arc<Camera>,
    max_fragment: usize,
    streaming: bool,
    datagram: Vec<u8>,
    /// 本端未能发出的分片数
    dropped: u64,
}

impl UplinkActor {
    pub fn new(session: UplinkSession, camera: Arc<Camera>, max_fragment: usize) -> Self {
        let cipher = XorCipher::new(session.key.clone());
        Self {
            session,
            cipher,
            camera,
            max_fragment,
            streaming: false,
            datagram: Vec::new(),
            dropped: 0,
        }
    }

    pub fn client_id(&self) -> i32 {
        self.session.client_id
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn dropped_fragments(&self) -> u64 {
        self.dropped
    }

    /// 处理一条消息，返回是否继续循环
    pub fn handle(&mut self, msg: Message) -> bool {
        match msg {
            Message::CameraRequest { .. } => self.toggle_stream(),
            Message::SensorData(reading) => self.send_sensor(&reading),
            Message::Terminate => {
                if self.streaming {
                    self.camera.release(self.session.client_id);
                    self.streaming = false;
                }
                return false;
            },
            other => debug!(client_id = self.session.client_id, "Uplink ignoring {}", other),
        }
        true
    }

    fn toggle_stream(&mut self) {
        let client_id = self.session.client_id;
        if self.streaming {
            self.camera.release(client_id);
            self.streaming = false;
            info!(client_id, "Streaming stopped");
        } else if self.camera.reserve(client_id) {
            self.streaming = true;
            info!(client_id, peer = %self.session.peer, "Streaming started");
        } else {
            warn!(client_id, "Camera unavailable, staying idle");
        }
    }

    fn send_sensor(&self, reading: &SensorReading) {
        let datagram = encode_sensor_datagram(reading);
        match self.session.socket.send_to(&datagram, self.session.peer) {
            Ok(_) => trace!(client_id = self.session.client_id, "Sent {:?}", reading),
            Err(e) => warn!(client_id = self.session.client_id, "Sensor send failed: {}", e),
        }
    }

    /// 抓取并发送一帧，返回发送的分片数
    pub fn upload_frame(&mut self) -> usize {
        let mut frame = self.camera.capture_encoded_frame();
        if frame.is_empty() {
            return 0;
        }
        self.cipher.apply(&mut frame);

        let fragments = match Fragmenter::new(&frame, self.max_fragment) {
            Ok(fragments) => fragments,
            Err(e) => {
                error!(client_id = self.session.client_id, "Dropping frame: {}", e);
                return 0;
            },
        };

        let mut sent = 0;
        for (seq, chunk) in fragments {
            let header = FrameHeader {
                frame_size: frame.len() as u32,
                cols: self.camera.width(),
                rows: self.camera.height(),
                frag_size: chunk.len() as u16,
                frag_seq: seq,
            };
            encode_frame_datagram(&header, chunk, &mut self.datagram);
            match self.session.socket.send_to(&self.datagram, self.session.peer) {
                Ok(_) => sent += 1,
                // 丢片由客户端容忍；套接字共享且非阻塞，发送缓冲满时直接丢弃
                Err(e) => {
                    self.dropped += 1;
                    let reason = if e.kind() == ErrorKind::WouldBlock {
                        "send buffer full".to_string()
                    } else {
                        e.to_string()
                    };
                    debug!(
                        client_id = self.session.client_id,
                        dropped = self.dropped,
                        "Fragment {} not sent: {}",
                        seq,
                        reason
                    );
                },
            }
        }
        trace!(
            client_id = self.session.client_id,
            "Frame of {} bytes sent in {} fragments",
            frame.len(),
            sent
        );
        sent
    }
}

impl Actor for UplinkActor {
    fn run(&mut self, ctx: &ActorContext) {
        let Some(mailbox) = ctx.mailbox().cloned() else {
            error!("{} started without a mailbox", ctx.name());
            return;
        };
        info!(client_id = self.session.client_id, "Uplink to {} ready", self.session.name);

        loop {
            if !self.streaming {
                mailbox.wait();
            }
            while let Some(msg) = mailbox.pop() {
                if !self.handle(msg) {
                    info!(client_id = self.session.client_id, "Uplink terminated");
                    return;
                }
            }
            if self.streaming && self.upload_frame() == 0 {
                std::thread::sleep(EMPTY_FRAME_BACKOFF);
            }
        }
    }
}

impl Drop for UplinkActor {
    fn drop(&mut self) {
        if self.streaming {
            self.camera.release(self.session.client_id);
        }
    }
}
