//! 底盘管理 actor
//!
//! 把调度器转来的 `Move`、`Heartbeat`、`SensorRequest` 原样写到底盘，
//! 并维护活跃用户计数：计数归零或收到 `Terminate` 时发送停车命令。

use crate::config::ChassisConfig;
use crate::device::{PortOpener, TtyOpener};
use crate::link::SerialLink;
use crate::ChassisError;
use sentry_actor::{Actor, ActorContext, Mailbox};
use sentry_protocol::{Message, MoveDirection, encode_chassis_command};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 底盘管理 actor
pub struct ChassisLink {
    link: SerialLink,
    users: u32,
}

impl ChassisLink {
    /// 按配置打开底盘串口
    ///
    /// 串口打不开时：`require_port` 为真则返回错误，否则记录警告并在首次发送时重试。
    pub fn new(config: &ChassisConfig, sink: Arc<Mailbox>) -> Result<Self, ChassisError> {
        let opener = TtyOpener::new(config.serial.clone(), config.baud);
        Self::with_opener(Box::new(opener), sink, config.require_port)
    }

    /// 使用自定义打开器（测试或非 TTY 设备）
    pub fn with_opener(
        opener: Box<dyn PortOpener>,
        sink: Arc<Mailbox>,
        require_port: bool,
    ) -> Result<Self, ChassisError> {
        let mut link = SerialLink::new(opener, sink);
        if let Err(e) = link.open() {
            if require_port {
                error!("Unable to open chassis serial port: {}", e);
                return Err(e);
            }
            warn!("Unable to open chassis serial port, will retry on first send: {}", e);
        }
        Ok(Self { link, users: 0 })
    }

    /// 当前活跃用户数
    pub fn users(&self) -> u32 {
        self.users
    }

    /// 处理一条消息，返回是否继续循环
    pub fn handle(&mut self, msg: Message) -> bool {
        match msg {
            Message::Move(_) | Message::Heartbeat | Message::SensorRequest => {
                self.forward(&msg);
            },
            Message::UserUp => {
                self.users += 1;
                info!("Chassis user joined, {} active", self.users);
            },
            Message::UserDown => {
                if self.users == 0 {
                    error!("UserDown with no active users, ignoring");
                } else {
                    self.users -= 1;
                    info!("Chassis user left, {} active", self.users);
                    if self.users == 0 {
                        self.stop_chassis();
                    }
                }
            },
            Message::Terminate => {
                self.stop_chassis();
                return false;
            },
            other => debug!("chmgr ignoring {}", other),
        }
        true
    }

    fn forward(&mut self, msg: &Message) {
        let Some(payload) = encode_chassis_command(msg) else {
            return;
        };
        match self.link.send(&payload) {
            Ok(()) => debug!("Sent {} to chassis", msg),
            Err(e) => warn!("Dropping {}: {}", msg, e),
        }
    }

    fn stop_chassis(&mut self) {
        info!("Stopping chassis");
        self.forward(&Message::Move(MoveDirection::Stop));
    }
}

impl Actor for ChassisLink {
    fn run(&mut self, ctx: &ActorContext) {
        let Some(mailbox) = ctx.mailbox() else {
            error!("{} started without a mailbox", ctx.name());
            return;
        };
        info!("Starting {} loop", ctx.name());

        loop {
            mailbox.wait();
            while let Some(msg) = mailbox.pop() {
                if !self.handle(msg) {
                    self.link.close();
                    return;
                }
            }
        }
    }
}
