//! 进程内事件总线。
//!
//! # 教案式说明
//! - **意图 (Why)**：单进程部署与测试需要一个满足 [`EventBus`] 全部契约的实现，包括存活状态旁路与投递确认；
//! - **契约 (What)**：
//!   - 路由键为 [`Cri::address`]；同一地址的多个监听者各自收到一份消息（扇出）；
//!   - 监听者数量在 0 与非 0 之间切换时，通过 `tokio::sync::watch` 广播 [`ListenerStatus`]；
//!   - 订阅流被丢弃即注销，无需显式调用；
//! - **执行 (How)**：路由表为 `DashMap<Cri, Route>`，每个监听者持有一条无界 `mpsc` 通道，
//!   因而 `send` 永不阻塞；确认通过共享的 `oneshot` 槽位实现，首个拉取消息的确认型监听者负责触发；
//! - **风险 (Trade-offs)**：无界通道意味着慢消费者会积压内存，流式推送的背压由协议层的
//!   `suspend`/`resume` 控制承担。

use std::{
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

use super::{EventBus, EventStream, ListenerStatus, ListenerStatusStream};
use crate::{
    error::{InvokeError, Result},
    event::{Cri, Event},
};

/// 进程内总线配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalBusConfig {
    /// `send_with_ack` 等待确认的最长时间（毫秒）。
    pub ack_timeout_ms: u64,
}

impl Default for LocalBusConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
        }
    }
}

impl LocalBusConfig {
    /// 从 TOML 文本加载，缺省字段取默认值。
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// 确认超时。
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// 进程内事件总线，克隆后共享同一路由表。
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    routes: DashMap<Cri, Route>,
    next_listener: AtomicU64,
    config: LocalBusConfig,
}

struct Route {
    listeners: Vec<Listener>,
    status: watch::Sender<ListenerStatus>,
}

impl Route {
    fn new() -> Self {
        let (status, _) = watch::channel(ListenerStatus::Inactive);
        Self {
            listeners: Vec::new(),
            status,
        }
    }

    fn publish_status(&self) {
        let next = ListenerStatus::from_listener_count(self.listeners.len());
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<Envelope>,
}

/// 共享确认槽：多个确认型监听者中只有第一个拉取者生效。
type AckSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

struct Envelope {
    event: Event,
    ack: Option<AckSlot>,
}

impl LocalBus {
    /// 以默认配置构造。
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定配置构造。
    #[must_use]
    pub fn with_config(config: LocalBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                routes: DashMap::new(),
                next_listener: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// 当前配置。
    pub fn config(&self) -> &LocalBusConfig {
        &self.inner.config
    }

    /// 某地址当前的监听者数量。
    pub fn listener_count(&self, address: &Cri) -> usize {
        self.inner
            .routes
            .get(&address.address())
            .map_or(0, |route| route.listeners.len())
    }

    /// 路由表中的地址数量；既无监听者也无状态订阅者的地址会被回收。
    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }

    /// 投递并等待确认型监听者拉取。
    ///
    /// # 契约说明（What）
    /// - 地址上没有监听者时立即返回 [`InvokeError::Transport`]；
    /// - 超过 [`LocalBusConfig::ack_timeout_ms`] 仍未被确认型监听者拉取时返回 [`InvokeError::Transport`]；
    /// - 非确认型监听者同样会收到消息，但不会触发确认。
    pub async fn send_with_ack(&self, event: Event) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let slot: AckSlot = Arc::new(Mutex::new(Some(tx)));
        let destination = event.destination().clone();
        let delivered = self.inner.deliver(event, Some(slot));
        if delivered == 0 {
            return Err(InvokeError::transport(format!(
                "no listener for `{destination}`"
            )));
        }
        match tokio::time::timeout(self.inner.config.ack_timeout(), rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(InvokeError::transport(format!(
                "delivery to `{destination}` was never acknowledged"
            ))),
            Err(_) => Err(InvokeError::transport(format!(
                "acknowledgement from `{destination}` timed out"
            ))),
        }
    }

    fn subscribe(&self, address: &Cri, acknowledge: bool) -> Subscription {
        let address = address.address();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut route = self
                .inner
                .routes
                .entry(address.clone())
                .or_insert_with(Route::new);
            route.listeners.push(Listener { id, sender });
            route.publish_status();
        }
        debug!(address = %address, listener = id, acknowledge, "listener registered");
        Subscription {
            receiver,
            acknowledge,
            registration: Registration {
                bus: Arc::downgrade(&self.inner),
                address,
                id,
            },
        }
    }
}

impl Inner {
    /// 扇出到地址上的每个监听者，返回成功投递的份数。
    fn deliver(&self, event: Event, ack: Option<AckSlot>) -> usize {
        let address = event.destination().address();
        let Some(route) = self.routes.get(&address) else {
            trace!(destination = %event.destination(), "no route, event dropped");
            return 0;
        };
        let mut delivered = 0;
        for listener in &route.listeners {
            let envelope = Envelope {
                event: event.clone(),
                ack: ack.clone(),
            };
            if listener.sender.send(envelope).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            trace!(destination = %event.destination(), "no live listener, event dropped");
        }
        delivered
    }

    fn unregister(&self, address: &Cri, id: u64) {
        let now_empty = match self.routes.get_mut(address) {
            Some(mut route) => {
                route.listeners.retain(|listener| listener.id != id);
                route.publish_status();
                route.listeners.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.prune(address);
        }
        debug!(address = %address, listener = id, "listener unregistered");
    }

    /// 回收既无监听者也无状态订阅者的路由。
    fn prune(&self, address: &Cri) {
        let removed = self.routes.remove_if(address, |_, route| {
            route.listeners.is_empty() && route.status.receiver_count() == 0
        });
        if removed.is_some() {
            trace!(address = %address, "idle route pruned");
        }
    }
}

/// 监听状态订阅：持有 `watch` 接收端，丢弃时先释放接收端再尝试回收路由。
struct StatusWatch {
    receiver: Option<watch::Receiver<ListenerStatus>>,
    bus: Weak<Inner>,
    address: Cri,
}

impl Drop for StatusWatch {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if let Some(bus) = self.bus.upgrade() {
            bus.prune(&self.address);
        }
    }
}

struct Registration {
    bus: Weak<Inner>,
    address: Cri,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(&self.address, self.id);
        }
    }
}

/// 单个监听者的入站流，丢弃即注销。
struct Subscription {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    acknowledge: bool,
    registration: Registration,
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(envelope)) => {
                if self.acknowledge
                    && let Some(sender) = envelope.ack.as_ref().and_then(|slot| slot.lock().take())
                {
                    let _ = sender.send(());
                }
                Poll::Ready(Some(envelope.event))
            }
            Poll::Ready(None) => {
                trace!(address = %self.registration.address, "subscription channel closed");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn listen(&self, address: &Cri) -> Result<EventStream> {
        Ok(self.subscribe(address, false).boxed())
    }

    async fn listen_with_ack(&self, address: &Cri) -> Result<EventStream> {
        Ok(self.subscribe(address, true).boxed())
    }

    fn send(&self, event: Event) {
        self.inner.deliver(event, None);
    }

    async fn is_anyone_listening(&self, address: &Cri) -> Result<bool> {
        Ok(self.listener_count(address) > 0)
    }

    fn monitor_listener_status(&self, address: &Cri) -> ListenerStatusStream {
        let address = address.address();
        let receiver = self
            .inner
            .routes
            .entry(address.clone())
            .or_insert_with(Route::new)
            .status
            .subscribe();
        let feed = StatusWatch {
            receiver: Some(receiver),
            bus: Arc::downgrade(&self.inner),
            address,
        };
        stream::unfold((feed, true), |(mut feed, first)| async move {
            let receiver = feed.receiver.as_mut()?;
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let status = *receiver.borrow_and_update();
            Some((Ok(status), (feed, false)))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::headers;

    fn ping(to: &str) -> Event {
        Event::new(to.parse().expect("cri")).with_header(headers::CORRELATION_ID, "c1")
    }

    #[tokio::test]
    async fn fans_out_to_every_listener_of_the_address() {
        let bus = LocalBus::new();
        let address = Cri::service("svc");
        let mut first = bus.listen(&address).await.expect("listen");
        let mut second = bus.listen(&address).await.expect("listen");

        bus.send(ping("service:svc/echo"));

        assert_eq!(first.next().await.expect("first").correlation_id(), Some("c1"));
        assert_eq!(second.next().await.expect("second").correlation_id(), Some("c1"));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_and_publishes_inactive() {
        let bus = LocalBus::new();
        let address = Cri::service("caller");
        let mut status = bus.monitor_listener_status(&address);
        assert_eq!(status.next().await.expect("current").expect("ok"), ListenerStatus::Inactive);

        let subscription = bus.listen(&address).await.expect("listen");
        assert!(bus.is_anyone_listening(&address).await.expect("query"));
        assert_eq!(status.next().await.expect("change").expect("ok"), ListenerStatus::Active);

        drop(subscription);
        assert!(!bus.is_anyone_listening(&address).await.expect("query"));
        assert_eq!(status.next().await.expect("change").expect("ok"), ListenerStatus::Inactive);
    }

    #[tokio::test]
    async fn send_with_ack_resolves_when_acknowledging_listener_pulls() {
        let bus = LocalBus::new();
        let address = Cri::service("svc");
        let mut inbound = bus.listen_with_ack(&address).await.expect("listen");

        let sender = bus.clone();
        let pending = tokio::spawn(async move { sender.send_with_ack(ping("service:svc/x")).await });
        let event = inbound.next().await.expect("event");
        assert_eq!(event.destination().path().as_deref(), Some("/x"));
        pending.await.expect("join").expect("acknowledged");
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_ack_times_out_without_acknowledging_listener() {
        let bus = LocalBus::with_config(LocalBusConfig { ack_timeout_ms: 50 });
        let _plain = bus.listen(&Cri::service("svc")).await.expect("listen");

        let err = bus
            .send_with_ack(ping("service:svc/x"))
            .await
            .expect_err("nobody acknowledges");
        assert!(matches!(err, InvokeError::Transport { .. }));

        let err = bus
            .send_with_ack(ping("service:nobody/x"))
            .await
            .expect_err("no listener");
        assert!(err.to_string().contains("no listener"));
    }

    #[tokio::test]
    async fn dropped_status_monitors_release_their_routes() {
        let bus = LocalBus::new();
        for i in 0..1_000 {
            let address = Cri::service(format!("ghost{i}"));
            let mut status = bus.monitor_listener_status(&address);
            assert_eq!(status.next().await.expect("current").expect("ok"), ListenerStatus::Inactive);
        }
        assert_eq!(bus.route_count(), 0);
    }

    #[tokio::test]
    async fn route_outlives_whichever_of_listener_and_monitor_leaves_first() {
        let bus = LocalBus::new();
        let address = Cri::service("caller");

        let status = bus.monitor_listener_status(&address);
        let subscription = bus.listen(&address).await.expect("listen");
        drop(subscription);
        assert_eq!(bus.route_count(), 1);
        drop(status);
        assert_eq!(bus.route_count(), 0);

        let subscription = bus.listen(&address).await.expect("listen");
        let status = bus.monitor_listener_status(&address);
        drop(status);
        assert_eq!(bus.route_count(), 1);
        assert_eq!(bus.listener_count(&address), 1);
        drop(subscription);
        assert_eq!(bus.route_count(), 0);
    }

    #[test]
    fn config_loads_from_toml_with_defaults() {
        assert_eq!(LocalBusConfig::from_toml_str("").expect("empty"), LocalBusConfig::default());
        let config = LocalBusConfig::from_toml_str("ack_timeout_ms = 10").expect("toml");
        assert_eq!(config.ack_timeout(), Duration::from_millis(10));
    }
}
