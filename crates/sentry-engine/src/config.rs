//! 进程配置
//!
//! 一个 TOML 文件，每个组件一段；所有键都有默认值，空文件也是合法配置。
//!
//! ```toml
//! [chmgr]
//! serial = "/dev/ttyACM0"
//! baud = 9600
//!
//! [netcom]
//! port = 8000
//! certfile = "/etc/sentry/server.pem"
//! keyfile = "/etc/sentry/server.key"
//!
//! [camera]
//! cols = 320
//! rows = 240
//!
//! [rcmgr]
//! retries = 3
//! bt_timeout = 5
//! ```

use crate::EngineError;
use sentry_chassis::ChassisConfig;
use sentry_netcom::{CameraConfig, NetcomConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sentry/sentry.toml";

/// `[rcmgr]` 配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcmgrConfig {
    /// 一次搜索的尝试次数
    pub retries: u32,
    /// 单次蓝牙搜索时长（秒）
    pub bt_timeout: u64,
}

impl RcmgrConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.bt_timeout)
    }
}

impl Default for RcmgrConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            bt_timeout: 5,
        }
    }
}

/// 完整进程配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub chmgr: ChassisConfig,
    pub netcom: NetcomConfig,
    pub camera: CameraConfig,
    pub rcmgr: RcmgrConfig,
}

impl SentryConfig {
    /// 读取并解析配置文件
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| EngineError::Config {
            path: path.display().to_string(),
            reason,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// 配置文件路径，未指定时使用默认值
    pub fn resolve_path(path: Option<PathBuf>) -> PathBuf {
        path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}
