//! 引擎错误类型

use sentry_actor::ActorError;
use sentry_chassis::ChassisError;
use sentry_netcom::NetcomError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// 配置文件读取或解析失败
    #[error("Config error in {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Chassis(#[from] ChassisError),

    #[error(transparent)]
    Netcom(#[from] NetcomError),

    #[error(transparent)]
    Actor(#[from] ActorError),
}
