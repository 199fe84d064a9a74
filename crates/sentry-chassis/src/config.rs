//! 底盘链路配置（`[chmgr]` 段）

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 底盘链路配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    /// 串口设备路径
    pub serial: PathBuf,
    /// 波特率
    pub baud: u32,
    /// 启动时串口不可用是否视为致命错误
    ///
    /// 默认 `false`：记录警告，在第一次发送时重试打开。
    pub require_port: bool,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            serial: PathBuf::from("/dev/ttyACM0"),
            baud: 9600,
            require_port: false,
        }
    }
}
