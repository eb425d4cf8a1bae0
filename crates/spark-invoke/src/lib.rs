//! # spark-invoke
//!
//! ## 定位与职责（Why）
//! - 在发布/订阅事件总线之上提供“服务调用”语义：把发往 `service:<服务名>/<方法名>` 的消息
//!   转为方法调用，再把结果（单值、阻塞值、单值异步、多值流）以回包形式发回请求的 `reply-to`；
//! - 多值结果以“流条目”管理：每个 `correlation-id` 至多一个条目，支持 `cancel` / `suspend` / `resume`
//!   控制面，调用方消失时自动终止。
//!
//! ## 架构嵌入（Where）
//! - `event` 与 `bus` 定义消息模型与总线契约，`LocalBus` 提供进程内实现；
//! - `registry` 把服务描述构建为不可变的方法表，`resolver` 提供参数解析、返回值转换与异常转换三条策略链；
//! - `supervisor` 驱动单个服务的订阅与分发，`stream` 管理流条目与存活监控；
//! - `client` 为调用方提供单值调用与打开流的助手；
//! - `config`、`error` 与 `observability` 承载配置、错误域与日志订阅器。
//!
//! ## 使用方式（How）
//! 1. 用 [`ServiceDescriptor`] 声明方法并通过 [`MethodRegistry::build`] 构建注册表；
//! 2. 用 [`Supervisor::builder`] 绑定总线与配置，调用 `start` 开始服务；
//! 3. 调用方以 [`ServiceClient::connect`] 监听自己的回包地址后发起调用。

/// 事件总线契约与进程内实现。
pub mod bus;

/// 调用方助手。
pub mod client;

/// 负载编解码与媒体类型判断。
pub mod codec;

/// Supervisor 配置。
pub mod config;

/// 错误域。
///
/// - **契约定位 (What)**：框架错误 [`InvokeError`] 与业务错误 [`MethodError`] 分开建模，
///   二者都可折叠为异常转换器的输入 [`error::Fault`]；
/// - **风险提示 (Trade-offs)**：错误消息会回传给调用方，避免拼接敏感信息。
pub mod error;

/// 消息模型：资源标识、头部与事件。
pub mod event;

/// 日志订阅器安装。
pub mod observability;

/// 方法注册表。
pub mod registry;

/// 三条策略链。
pub mod resolver;

/// 流条目与控制面。
pub mod stream;

/// 单个服务的调用协议驱动者。
pub mod supervisor;

pub use bus::{EventBus, LocalBus, LocalBusConfig};
pub use client::{CallStream, ClientError, ServiceClient};
pub use config::InvokeConfig;
pub use error::{InvokeError, MethodError, Result};
pub use event::{Cri, Event, Headers};
pub use registry::{MethodDescriptor, MethodRegistry, ReturnShape, ServiceDescriptor, ValueType};
pub use resolver::Resolvers;
pub use stream::{ControlCommand, StreamStats};
pub use supervisor::{Supervisor, SupervisorBuilder};
