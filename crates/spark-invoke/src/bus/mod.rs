//! # bus 模块说明
//!
//! ## 角色定位（Why）
//! - 定义协议依赖的传输契约 [`EventBus`]：只有“按地址投递、尽力而为”的发送，以及监听者存活状态的旁路通道；
//! - 请求/响应、背压与断连检测全部由上层协议通过关联标识、约定头部与存活监控合成。
//!
//! ## 设计要求（What）
//! - `send` 同步且不阻塞，投递失败不回报；
//! - `listen_with_ack` 在注册被确认后才返回，随后拉取的消息会向 `send_with_ack` 的发送方确认；
//! - `monitor_listener_status` 首先产出当前状态，然后产出每一次变化；流结束或产出错误视为存活监控异常。
//!
//! ## 实现提示（How）
//! - [`LocalBus`] 是进程内实现，供单进程部署与测试使用；网络化或集群化的传输不在本 crate 内。

mod local;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use local::{LocalBus, LocalBusConfig};

use crate::{
    error::Result,
    event::{Cri, Event},
};

/// 某一地址上的监听状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerStatus {
    /// 至少有一个监听者。
    Active,
    /// 没有任何监听者。
    Inactive,
}

impl ListenerStatus {
    /// 由监听者数量推导状态。
    pub fn from_listener_count(count: usize) -> Self {
        if count == 0 {
            ListenerStatus::Inactive
        } else {
            ListenerStatus::Active
        }
    }
}

/// 入站消息流；流结束表示订阅被终止。
pub type EventStream = BoxStream<'static, Event>;

/// 监听状态流；产出错误或结束都属于存活监控异常。
pub type ListenerStatusStream = BoxStream<'static, Result<ListenerStatus>>;

/// 协议依赖的最小传输契约。
///
/// # 教案式说明
/// - **意图 (Why)**：Supervisor、流条目与客户端都只依赖该 trait，可在进程内总线与网络总线之间替换；
/// - **契约 (What)**：
///   - 所有地址参数都按 [`Cri::address`] 归一化，带路径的标识与其地址视为同一路由；
///   - `send` 必须立即返回，不得在调用栈上等待接收方；
///   - 返回的流为 `'static`，由调用方持有并在丢弃时注销；
/// - **风险 (Trade-offs)**：`send` 无法得知投递结果，需要确认语义的调用方应使用实现提供的扩展方法
///   （例如 [`LocalBus::send_with_ack`]）。
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// 订阅地址，不参与确认。
    async fn listen(&self, address: &Cri) -> Result<EventStream>;

    /// 订阅地址，注册确认后返回；拉取的消息向发送方确认。
    async fn listen_with_ack(&self, address: &Cri) -> Result<EventStream>;

    /// 尽力投递。
    fn send(&self, event: Event);

    /// 查询地址当前是否有监听者。
    async fn is_anyone_listening(&self, address: &Cri) -> Result<bool>;

    /// 订阅地址的监听状态变化，首个元素为当前状态。
    fn monitor_listener_status(&self, address: &Cri) -> ListenerStatusStream;
}
