//! # Sentry Actor
//!
//! 线程 + 邮箱的 actor 框架
//!
//! ## 模块
//!
//! - `mailbox`: 多生产者、单消费者的阻塞 FIFO 邮箱
//! - `cancel`: 无邮箱 actor 的协作式取消令牌
//! - `worker`: `Actor` trait 与生命周期句柄 `Worker`
//!
//! ## 生命周期
//!
//! ```text
//! Created ──start()──▶ Started ──线程进入 run()──▶ Running
//!                                                    │
//!                               stop(): Terminate / 取消令牌
//!                                                    ▼
//!                         Stopped ◀──线程退出并 join── Terminating
//! ```

pub mod cancel;
pub mod error;
pub mod mailbox;
pub mod worker;

pub use cancel::CancellationToken;
pub use error::ActorError;
pub use mailbox::Mailbox;
pub use worker::{Actor, ActorContext, ActorState, Worker};
