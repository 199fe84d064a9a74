//! 上行会话句柄

use crate::SessionKey;
use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

/// UDP 握手成功后建立的上行会话
///
/// 由网络服务端创建，随 `NetcomClientAlive` 交给调度器，再移交给上行 actor 独占。
/// 对端地址在握手时绑定，之后不再改变。
pub struct UplinkSession {
    /// 客户端标识（控制通道的底层句柄）
    pub client_id: i32,
    /// 可读名称，`ip:port`
    pub name: String,
    /// 握手数据报的源地址
    pub peer: SocketAddr,
    /// 会话对称密钥
    pub key: Box<SessionKey>,
    /// 服务端 UDP 监听套接字（与网络服务端共享）
    pub socket: Arc<UdpSocket>,
}

impl fmt::Debug for UplinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UplinkSession")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
