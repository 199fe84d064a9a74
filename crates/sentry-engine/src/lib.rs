//! # Sentry Engine
//!
//! 进程编排：加载配置、按依赖顺序启动各 actor，调度器作为 `engine` actor 运行；
//! 当前线程等待它退出后按相反的依赖顺序停止其余组件。
//!
//! ## 模块
//!
//! - `config`: TOML 配置文件
//! - `dispatcher`: 调度器与客户端注册表
//! - `rcmgr`: 本地遥控器管理 actor
//!
//! ## 启停顺序
//!
//! ```text
//! 启动: camera → netcom → chmgr → rcmgr → engine
//! 停止: engine（连同上行 actor）→ rcmgr → chmgr → netcom → camera
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod rcmgr;

pub use config::{DEFAULT_CONFIG_PATH, RcmgrConfig, SentryConfig};
pub use dispatcher::{CameraUplinks, ClientError, ClientRegistry, Dispatcher, UplinkSpawner};
pub use error::EngineError;
pub use rcmgr::{
    Button, ButtonState, ControllerBackend, ControllerEvent, NullBackend, RemoteControlManager,
    translate_buttons,
};

use sentry_actor::{Mailbox, Worker};
use sentry_chassis::ChassisLink;
use sentry_netcom::{Camera, NetcomServer};
use std::sync::Arc;
use tracing::info;

/// 服务端引擎
pub struct Engine {
    config: SentryConfig,
    mailbox: Arc<Mailbox>,
}

impl Engine {
    pub fn new(config: SentryConfig) -> Self {
        Self {
            config,
            mailbox: Arc::new(Mailbox::new()),
        }
    }

    /// 调度器邮箱；信号处理线程向其投递 `Terminate`
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    /// 启动全部组件并阻塞到调度器收到 `Terminate`
    ///
    /// 启动阶段的任何错误都会中止启动；已启动的组件在返回前停止。
    pub fn run(&self) -> Result<(), EngineError> {
        let config = &self.config;
        info!("Starting engine");

        let camera = Arc::new(Camera::test_pattern(&config.camera));

        let server = NetcomServer::bind(&config.netcom, Arc::clone(&self.mailbox))?;
        let mut netcom = Worker::new("netcom", server);
        netcom.start()?;

        let chmgr_box = Arc::new(Mailbox::new());
        let chassis = ChassisLink::new(&config.chmgr, Arc::clone(&self.mailbox))?;
        let mut chmgr = Worker::with_shared_mailbox("chmgr", Arc::clone(&chmgr_box), chassis);
        chmgr.start()?;

        let rcmgr_box = Arc::new(Mailbox::new());
        let remotes = RemoteControlManager::new(
            config.rcmgr.clone(),
            Box::new(NullBackend),
            Arc::clone(&self.mailbox),
        );
        let mut rcmgr = Worker::with_shared_mailbox("rcmgr", Arc::clone(&rcmgr_box), remotes);
        rcmgr.start()?;

        let uplinks = CameraUplinks::new(Arc::clone(&camera), config.netcom.fragment_size());
        let dispatcher = Dispatcher::new(chmgr_box, rcmgr_box, Box::new(uplinks));
        let mut engine = Worker::with_shared_mailbox("engine", Arc::clone(&self.mailbox), dispatcher);
        engine.start()?;
        engine.join();

        info!("Shutting down");
        rcmgr.stop();
        chmgr.stop();
        netcom.stop();
        drop(camera);
        info!("Engine stopped");
        Ok(())
    }
}
