//! 消息调度器
//!
//! 进程内唯一的路由点：按消息类型转发到底盘、遥控器管理或各客户端的上行 actor。
//! 客户端注册表只在调度线程上修改，注册/注销与对应的用户计数通知在同一次处理中完成。
//!
//! | 消息 | 动作 |
//! |---|---|
//! | `SearchRemote` | 转发给遥控器管理 |
//! | `Heartbeat` `SensorRequest` `Move` `UserUp` `UserDown` | 转发给底盘 |
//! | `NetcomClientAlive` | 创建上行 actor 并注册，通知底盘 `UserUp` |
//! | `NetcomClientDead` | 注销并停止上行 actor，通知底盘 `UserDown` |
//! | `CameraRequest` | 转发给对应客户端的上行 actor |
//! | `SensorData` | 复制给每个已注册客户端 |
//! | `Terminate` | 退出循环 |

use sentry_actor::{Actor, ActorContext, ActorError, Mailbox, Worker};
use sentry_netcom::{Camera, UplinkActor};
use sentry_protocol::{Message, UplinkSession};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ============================================================================
// 上行 actor 工厂
// ============================================================================

/// 为新客户端创建并启动上行 actor
pub trait UplinkSpawner: Send + 'static {
    fn spawn(&mut self, session: UplinkSession) -> Result<Worker, ActorError>;
}

/// 推送共享摄像头画面的上行 actor 工厂
pub struct CameraUplinks {
    camera: Arc<Camera>,
    max_fragment: usize,
}

impl CameraUplinks {
    pub fn new(camera: Arc<Camera>, max_fragment: usize) -> Self {
        Self {
            camera,
            max_fragment,
        }
    }
}

impl UplinkSpawner for CameraUplinks {
    fn spawn(&mut self, session: UplinkSession) -> Result<Worker, ActorError> {
        let name = format!("uplink-{}", session.client_id);
        let actor = UplinkActor::new(session, Arc::clone(&self.camera), self.max_fragment);
        let mut worker = Worker::with_mailbox(name, actor);
        worker.start()?;
        Ok(worker)
    }
}

// ============================================================================
// 客户端注册表
// ============================================================================

/// 注册表错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("Client already exists")]
    AlreadyExists,
    #[error("Client not found")]
    NotFound,
}

/// 客户端标识到上行 actor 的映射
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<i32, Worker>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, client_id: i32) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn register(&mut self, client_id: i32, worker: Worker) -> Result<(), ClientError> {
        if self.clients.contains_key(&client_id) {
            return Err(ClientError::AlreadyExists);
        }
        self.clients.insert(client_id, worker);
        Ok(())
    }

    /// 注销并停止上行 actor
    pub fn unregister(&mut self, client_id: i32) -> Result<(), ClientError> {
        let mut worker = self
            .clients
            .remove(&client_id)
            .ok_or(ClientError::NotFound)?;
        worker.stop();
        Ok(())
    }

    /// 投递给指定客户端
    pub fn send(&self, client_id: i32, msg: Message) -> Result<(), ClientError> {
        let worker = self.clients.get(&client_id).ok_or(ClientError::NotFound)?;
        worker.send(msg);
        Ok(())
    }

    /// 对每个客户端投递一条由 `make` 生成的消息
    pub fn broadcast(&self, make: impl Fn() -> Message) {
        for worker in self.clients.values() {
            worker.send(make());
        }
    }

    /// 停止全部上行 actor
    pub fn clear(&mut self) {
        for (client_id, mut worker) in self.clients.drain() {
            worker.stop();
            debug!(client_id, "Uplink stopped");
        }
    }
}

// ============================================================================
// 调度器
// ============================================================================

/// 调度器
pub struct Dispatcher {
    chmgr: Arc<Mailbox>,
    rcmgr: Arc<Mailbox>,
    uplinks: Box<dyn UplinkSpawner>,
    clients: ClientRegistry,
}

impl Dispatcher {
    pub fn new(chmgr: Arc<Mailbox>, rcmgr: Arc<Mailbox>, uplinks: Box<dyn UplinkSpawner>) -> Self {
        Self {
            chmgr,
            rcmgr,
            uplinks,
            clients: ClientRegistry::new(),
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// 停止全部上行 actor（进程退出时由引擎按顺序调用）
    pub fn clear_clients(&mut self) {
        self.clients.clear();
    }

    /// 路由一条消息，返回是否继续循环
    pub fn dispatch(&mut self, msg: Message) -> bool {
        debug!("Dispatching {}", msg);
        match msg {
            Message::SearchRemote => self.rcmgr.push(msg),
            Message::Heartbeat
            | Message::SensorRequest
            | Message::Move(_)
            | Message::UserUp
            | Message::UserDown => self.chmgr.push(msg),
            Message::NetcomClientAlive(session) => self.client_alive(*session),
            Message::NetcomClientDead { client_id } => {
                if self.clients.unregister(client_id).is_ok() {
                    info!(client_id, "Client removed");
                    self.chmgr.push(Message::UserDown);
                }
            },
            Message::CameraRequest { client_id } => {
                // 客户端已不在时静默丢弃
                let _ = self.clients.send(client_id, msg);
            },
            Message::SensorData(reading) => {
                self.clients.broadcast(|| Message::SensorData(reading));
            },
            Message::Terminate => {
                info!("Dispatcher terminating");
                return false;
            },
            other => warn!("Dispatcher dropping unexpected {}", other),
        }
        true
    }

    fn client_alive(&mut self, session: UplinkSession) {
        let client_id = session.client_id;
        if self.clients.contains(client_id) {
            warn!(client_id, "Duplicate client alive, ignoring");
            return;
        }

        let worker = match self.uplinks.spawn(session) {
            Ok(worker) => worker,
            Err(e) => {
                error!(client_id, "Failed to create uplink: {}", e);
                return;
            },
        };
        if let Err(e) = self.clients.register(client_id, worker) {
            error!(client_id, "Failed to register uplink: {}", e);
            return;
        }
        info!(client_id, clients = self.clients.len(), "Client added");
        self.chmgr.push(Message::UserUp);
    }

    /// 在当前线程上运行调度循环，直到收到 `Terminate`
    pub fn serve(&mut self, mailbox: &Mailbox) {
        info!("Starting dispatcher loop");
        loop {
            mailbox.wait();
            while let Some(msg) = mailbox.pop() {
                if !self.dispatch(msg) {
                    return;
                }
            }
        }
    }
}

impl Actor for Dispatcher {
    fn run(&mut self, ctx: &ActorContext) {
        let Some(mailbox) = ctx.mailbox().cloned() else {
            error!("{} started without a mailbox", ctx.name());
            return;
        };
        self.serve(&mailbox);
        self.clear_clients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentry_protocol::{MoveDirection, SensorReading, SensorType};

    /// 永远失败的工厂
    struct Exhausted;

    impl UplinkSpawner for Exhausted {
        fn spawn(&mut self, session: UplinkSession) -> Result<Worker, ActorError> {
            Err(ActorError::ThreadError {
                name: format!("uplink-{}", session.client_id),
                source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
            })
        }
    }

    fn session(client_id: i32) -> Box<UplinkSession> {
        Box::new(UplinkSession {
            client_id,
            name: "test".to_string(),
            peer: "127.0.0.1:9".parse().unwrap(),
            key: Box::new([0u8; sentry_protocol::KEY_LEN]),
            socket: Arc::new(std::net::UdpSocket::bind("127.0.0.1:0").unwrap()),
        })
    }

    fn drain(mailbox: &Mailbox) -> Vec<Message> {
        std::iter::from_fn(|| mailbox.pop()).collect()
    }

    #[test]
    fn test_chassis_and_rcmgr_routing() {
        let chmgr = Arc::new(Mailbox::new());
        let rcmgr = Arc::new(Mailbox::new());
        let mut dispatcher =
            Dispatcher::new(Arc::clone(&chmgr), Arc::clone(&rcmgr), Box::new(Exhausted));

        assert!(dispatcher.dispatch(Message::Move(MoveDirection::Forward)));
        assert!(dispatcher.dispatch(Message::Heartbeat));
        assert!(dispatcher.dispatch(Message::SearchRemote));

        let routed = drain(&chmgr);
        assert!(matches!(
            routed.as_slice(),
            [Message::Move(MoveDirection::Forward), Message::Heartbeat]
        ));
        assert!(matches!(drain(&rcmgr).as_slice(), [Message::SearchRemote]));
    }

    #[test]
    fn test_spawn_failure_drops_alive() {
        let chmgr = Arc::new(Mailbox::new());
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&chmgr),
            Arc::new(Mailbox::new()),
            Box::new(Exhausted),
        );

        assert!(dispatcher.dispatch(Message::NetcomClientAlive(session(5))));
        assert!(dispatcher.clients().is_empty());
        assert!(chmgr.is_empty());
    }

    #[test]
    fn test_lookup_miss_is_silent() {
        let chmgr = Arc::new(Mailbox::new());
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&chmgr),
            Arc::new(Mailbox::new()),
            Box::new(Exhausted),
        );

        assert!(dispatcher.dispatch(Message::CameraRequest { client_id: 3 }));
        assert!(dispatcher.dispatch(Message::NetcomClientDead { client_id: 3 }));
        assert!(dispatcher.dispatch(Message::SensorData(SensorReading::new(
            SensorType::Temperature,
            21
        ))));
        assert!(chmgr.is_empty());
        assert!(!dispatcher.dispatch(Message::Terminate));
    }
}
