//! # supervisor 模块说明
//!
//! ## 角色定位（Why）
//! - 每个对外暴露的服务对应一个 [`Supervisor`]：持有唯一的入站订阅、方法注册表、三条策略链与流条目表；
//! - 负责把入站消息转为方法调用，再把结果（同步值、阻塞值、单值异步、多值流）转回总线消息。
//!
//! ## 状态机（What）
//! - `Inactive --start--> Active`：原子地切换状态，随后 `listen_with_ack` 订阅服务地址并启动分发任务；
//!   订阅失败时回到 `Inactive` 并返回错误；重复启动返回 [`InvokeError::AlreadyStarted`]；
//! - `Active --stop--> Inactive`：原子地切换状态，中止分发任务（丢弃入站订阅），取消全部流条目；
//!   重复停止返回 [`InvokeError::AlreadyStopped`]；
//! - 入站订阅自行结束：强制回到 `Inactive`，以 warn 级别记录，取消全部流条目，不自动重启。
//!
//! ## 并发模型（How）
//! - 分发任务按到达顺序逐条处理入站消息，单值异步、阻塞与多值结果都在各自的任务上完成，分发从不等待方法结果；
//! - 唯一的共享可变状态是流条目表。

mod dispatch;
pub(crate) mod reply;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    bus::{EventBus, EventStream},
    config::InvokeConfig,
    error::{InvokeError, Result},
    event::Cri,
    registry::MethodRegistry,
    resolver::Resolvers,
    stream::{StreamStats, StreamTable},
};

use reply::Replier;

/// 单个服务的调用协议驱动者。
pub struct Supervisor {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// 分发任务与 Supervisor 句柄共享的状态。
pub(crate) struct Shared {
    pub(crate) registry: Arc<MethodRegistry>,
    pub(crate) config: InvokeConfig,
    pub(crate) address: Cri,
    pub(crate) replier: Replier,
    pub(crate) streams: Arc<StreamTable>,
    active: AtomicBool,
}

/// [`Supervisor`] 构建器。
pub struct SupervisorBuilder {
    registry: Arc<MethodRegistry>,
    bus: Arc<dyn EventBus>,
    config: InvokeConfig,
    resolvers: Option<Resolvers>,
}

impl SupervisorBuilder {
    /// 指定配置。
    #[must_use]
    pub fn config(mut self, config: InvokeConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认策略链；未指定时按配置生成 [`Resolvers::defaults`]。
    #[must_use]
    pub fn resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// 完成构建，Supervisor 处于 `Inactive` 状态。
    pub fn build(self) -> Supervisor {
        let resolvers = self
            .resolvers
            .unwrap_or_else(|| Resolvers::defaults(&self.config));
        let address = Cri::service(self.registry.service());
        Supervisor {
            shared: Arc::new(Shared {
                replier: Replier::new(self.bus, Arc::new(resolvers)),
                registry: self.registry,
                config: self.config,
                address,
                streams: Arc::new(StreamTable::default()),
                active: AtomicBool::new(false),
            }),
            dispatcher: Mutex::new(None),
        }
    }
}

impl Supervisor {
    /// 创建构建器。
    pub fn builder(registry: impl Into<Arc<MethodRegistry>>, bus: Arc<dyn EventBus>) -> SupervisorBuilder {
        SupervisorBuilder {
            registry: registry.into(),
            bus,
            config: InvokeConfig::default(),
            resolvers: None,
        }
    }

    /// 服务名。
    pub fn service(&self) -> &str {
        self.shared.registry.service()
    }

    /// 入站订阅的地址，`service:<服务名>`。
    pub fn address(&self) -> &Cri {
        &self.shared.address
    }

    /// 是否处于 `Active` 状态。
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// 流条目统计。
    pub fn stream_stats(&self) -> StreamStats {
        self.shared.streams.stats()
    }

    /// 启动：订阅服务地址并开始分发。
    ///
    /// # 契约说明（What）
    /// - 返回前订阅已被总线确认，此后发往服务地址的消息不会丢失；
    /// - 必须在 tokio 运行时内调用。
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InvokeError::AlreadyStarted {
                service: self.service().to_owned(),
            });
        }

        let inbound = match shared.replier.bus().listen_with_ack(&shared.address).await {
            Ok(inbound) => inbound,
            Err(err) => {
                shared.active.store(false, Ordering::Release);
                warn!(service = self.service(), error = %err, "supervisor failed to subscribe");
                return Err(err);
            }
        };

        let handle = tokio::spawn(dispatch_loop(Arc::clone(shared), inbound));
        {
            let mut dispatcher = self.dispatcher.lock();
            if let Some(stale) = dispatcher.replace(handle) {
                stale.abort();
            }
        }
        // `stop` 可能在订阅期间抢先完成，此时新任务不应继续运行。
        if !self.is_active()
            && let Some(handle) = self.dispatcher.lock().take()
        {
            handle.abort();
        }
        info!(service = self.service(), address = %shared.address, "supervisor started");
        Ok(())
    }

    /// 停止：中止分发并取消全部流条目。
    pub fn stop(&self) -> Result<()> {
        if self
            .shared
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InvokeError::AlreadyStopped {
                service: self.service().to_owned(),
            });
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        let cancelled = self.shared.streams.cancel_all();
        info!(service = self.service(), cancelled, "supervisor stopped");
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
        self.shared.streams.cancel_all();
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut inbound: EventStream) {
    while let Some(event) = inbound.next().await {
        shared.dispatch(event);
    }
    if shared.active.swap(false, Ordering::AcqRel) {
        let cancelled = shared.streams.cancel_all();
        warn!(
            service = shared.registry.service(),
            cancelled,
            "inbound subscription terminated unexpectedly, supervisor deactivated"
        );
    }
}
