//! Actor 与其生命周期句柄
//!
//! `Actor` 只描述"运行直到结束"这一能力；线程创建、命名和停止时的 join 由 `Worker` 负责。
//! 拥有邮箱的 actor 通过 `Terminate` 协作退出；没有邮箱的 actor 通过取消令牌退出。

use crate::cancel::CancellationToken;
use crate::error::ActorError;
use crate::mailbox::Mailbox;
use sentry_protocol::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// 可在独立线程上运行的 actor
pub trait Actor: Send + 'static {
    /// actor 主循环
    ///
    /// 有邮箱的 actor 在收到 `Terminate` 后返回；
    /// 无邮箱的 actor 在 `ctx.is_cancelled()` 为真时返回。
    fn run(&mut self, ctx: &ActorContext);
}

/// actor 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Created = 0,
    Started = 1,
    Running = 2,
    Terminating = 3,
    Stopped = 4,
}

impl ActorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ActorState::Created,
            1 => ActorState::Started,
            2 => ActorState::Running,
            3 => ActorState::Terminating,
            _ => ActorState::Stopped,
        }
    }
}

/// 运行时上下文，传给 `Actor::run`
#[derive(Debug, Clone)]
pub struct ActorContext {
    name: String,
    mailbox: Option<Arc<Mailbox>>,
    cancel: CancellationToken,
}

impl ActorContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// actor 自己的邮箱；无邮箱 actor 返回 `None`
    pub fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        self.mailbox.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// actor 句柄：持有尚未启动的 actor、邮箱和执行线程
pub struct Worker {
    name: String,
    actor: Option<Box<dyn Actor>>,
    mailbox: Option<Arc<Mailbox>>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// 无邮箱 actor，通过取消令牌停止
    pub fn new<A: Actor>(name: impl Into<String>, actor: A) -> Self {
        Self::build(name.into(), Box::new(actor), None)
    }

    /// 拥有新邮箱的 actor
    pub fn with_mailbox<A: Actor>(name: impl Into<String>, actor: A) -> Self {
        Self::build(name.into(), Box::new(actor), Some(Arc::new(Mailbox::new())))
    }

    /// 使用已有邮箱的 actor（邮箱需要在 actor 构造之前分发给其他组件时）
    pub fn with_shared_mailbox<A: Actor>(
        name: impl Into<String>,
        mailbox: Arc<Mailbox>,
        actor: A,
    ) -> Self {
        Self::build(name.into(), Box::new(actor), Some(mailbox))
    }

    fn build(name: String, actor: Box<dyn Actor>, mailbox: Option<Arc<Mailbox>>) -> Self {
        Self {
            name,
            actor: Some(actor),
            mailbox,
            cancel: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(ActorState::Created as u8)),
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// actor 邮箱（可克隆后交给生产者）
    pub fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        self.mailbox.as_ref()
    }

    /// 向 actor 邮箱投递消息；无邮箱时丢弃并返回 `false`
    pub fn send(&self, msg: Message) -> bool {
        match &self.mailbox {
            Some(mailbox) => {
                mailbox.push(msg);
                true
            },
            None => {
                warn!("Actor '{}' has no mailbox, dropping {}", self.name, msg);
                false
            },
        }
    }

    /// 启动执行线程；已启动时为空操作
    pub fn start(&mut self) -> Result<(), ActorError> {
        let Some(mut actor) = self.actor.take() else {
            debug!("Actor '{}' already started", self.name);
            return Ok(());
        };

        let ctx = ActorContext {
            name: self.name.clone(),
            mailbox: self.mailbox.clone(),
            cancel: self.cancel.clone(),
        };
        let state = Arc::clone(&self.state);
        state.store(ActorState::Started as u8, Ordering::Release);

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                // stop() 可能已抢先进入 Terminating
                let _ = state.compare_exchange(
                    ActorState::Started as u8,
                    ActorState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                actor.run(&ctx);
                state.store(ActorState::Stopped as u8, Ordering::Release);
                debug!("Actor '{}' exited", ctx.name);
            })
            .map_err(|source| {
                self.state
                    .store(ActorState::Stopped as u8, Ordering::Release);
                ActorError::ThreadError {
                    name: self.name.clone(),
                    source,
                }
            })?;

        self.thread = Some(handle);
        debug!("Actor '{}' started", self.name);
        Ok(())
    }

    /// 停止 actor 并等待线程退出；可重复调用
    ///
    /// 有邮箱时投递 `Terminate`，否则取消令牌。在 actor 自身线程上调用时不 join。
    pub fn stop(&mut self) {
        // 未启动的 actor 直接丢弃
        self.actor = None;

        let Some(handle) = self.thread.take() else {
            return;
        };

        if self.state() != ActorState::Stopped {
            self.state
                .store(ActorState::Terminating as u8, Ordering::Release);
        }

        match &self.mailbox {
            Some(mailbox) => mailbox.push(Message::Terminate),
            None => self.cancel.cancel(),
        }

        if handle.thread().id() == thread::current().id() {
            warn!("Actor '{}' stopped from its own thread, not joining", self.name);
            return;
        }

        if handle.join().is_err() {
            error!("Actor '{}' thread panicked", self.name);
        }
        self.state.store(ActorState::Stopped as u8, Ordering::Release);
        debug!("Actor '{}' stopped", self.name);
    }

    /// 等待 actor 自行退出，不投递 `Terminate`；未启动时立即返回
    pub fn join(&mut self) {
        self.actor = None;
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.join().is_err() {
            error!("Actor '{}' thread panicked", self.name);
        }
        self.state.store(ActorState::Stopped as u8, Ordering::Release);
        debug!("Actor '{}' joined", self.name);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("has_mailbox", &self.mailbox.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo {
        seen: crossbeam_channel::Sender<String>,
    }

    impl Actor for Echo {
        fn run(&mut self, ctx: &ActorContext) {
            let Some(mailbox) = ctx.mailbox() else {
                return;
            };
            loop {
                let msg = mailbox.recv();
                let _ = self.seen.send(msg.to_string());
                if msg.is_terminate() {
                    break;
                }
            }
        }
    }

    struct Spinner;

    impl Actor for Spinner {
        fn run(&mut self, ctx: &ActorContext) {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut worker = Worker::with_mailbox("echo", Echo { seen: tx });
        assert_eq!(worker.state(), ActorState::Created);
        worker.start().unwrap();
        worker.start().unwrap();

        assert!(worker.send(Message::Heartbeat));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            "HEARTBEAT"
        );

        worker.stop();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "TERMINATE");
        assert_eq!(worker.state(), ActorState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut worker = Worker::with_mailbox("echo", Echo { seen: tx });
        worker.start().unwrap();
        worker.stop();
        worker.stop();
        assert_eq!(worker.state(), ActorState::Stopped);
    }

    #[test]
    fn test_stop_without_start() {
        let mut worker = Worker::new("idle", Spinner);
        worker.stop();
        assert_eq!(worker.state(), ActorState::Created);
        // 停止后不能再启动
        worker.start().unwrap();
        assert_eq!(worker.state(), ActorState::Created);
    }

    #[test]
    fn test_mailboxless_actor_cancelled() {
        let mut worker = Worker::new("spinner", Spinner);
        assert!(worker.mailbox().is_none());
        worker.start().unwrap();
        worker.stop();
        assert_eq!(worker.state(), ActorState::Stopped);
    }

    #[test]
    fn test_send_without_mailbox_drops() {
        let worker = Worker::new("spinner", Spinner);
        assert!(!worker.send(Message::UserUp));
    }

    #[test]
    fn test_join_waits_for_external_terminate() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut worker = Worker::with_mailbox("echo", Echo { seen: tx });
        worker.start().unwrap();

        let mailbox = Arc::clone(worker.mailbox().unwrap());
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            mailbox.push(Message::UserUp);
            mailbox.push(Message::Terminate);
        });

        worker.join();
        producer.join().unwrap();
        assert_eq!(worker.state(), ActorState::Stopped);
        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen, ["USER_UP", "TERMINATE"]);
        // join 之后 stop 为空操作
        worker.stop();
    }
}
