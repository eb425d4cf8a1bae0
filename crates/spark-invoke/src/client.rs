//! # client 模块说明
//!
//! ## 角色定位（Why）
//! - 调用方一侧的助手：在自己的回包地址上监听，按 `correlation-id` 把回包路由给对应的调用；
//! - 对外提供“单值调用”与“打开流”两种形态，并能对打开的流发送 `cancel` / `suspend` / `resume`。
//!
//! ## 设计要求（What）
//! - 客户端在构造时就开始监听回包地址，服务端的存活监控据此判断调用方是否在线；
//! - 丢弃 [`ServiceClient`] 会停止监听，服务端随之终止该客户端打开的所有流；
//! - 回包负载按 `content-type` 解码：JSON（缺省）或纯文本。
//!
//! ## 风险提示（Trade-offs）
//! - 路由表以关联标识为键，标识由客户端生成，格式为 `<回包资源名>-<序号>`；
//! - 单值调用受超时约束，默认 30 秒，可通过 [`ServiceClient::with_timeout`] 调整。

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::trace;

use crate::{
    bus::EventBus,
    codec,
    error::InvokeError,
    event::{Cri, Event, headers},
    resolver::ErrorDescriptor,
    stream::{COMPLETE, ControlCommand},
};

/// 调用方视角的失败。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// 服务端返回了错误回包。
    #[error("remote failure `{}` ({}): {}", .0.type_name, .0.code, .0.message)]
    Remote(ErrorDescriptor),

    /// 本地协议或传输失败。
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// 在超时时间内没有收到回包。
    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    /// 回包通道在收到结果前关闭。
    #[error("reply channel closed before a result arrived")]
    Closed,
}

struct ClientShared {
    bus: Arc<dyn EventBus>,
    reply_to: Cri,
    pending: DashMap<String, mpsc::UnboundedSender<Event>>,
    next_id: AtomicU64,
}

impl ClientShared {
    fn register(&self) -> (String, mpsc::UnboundedReceiver<Event>) {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let correlation_id = format!("{}-{sequence}", self.reply_to.resource());
        let (sender, receiver) = mpsc::unbounded_channel();
        self.pending.insert(correlation_id.clone(), sender);
        (correlation_id, receiver)
    }

    fn request(&self, destination: Cri, correlation_id: &str, args: &Value) -> Result<Event, InvokeError> {
        let mut request = Event::new(destination)
            .with_header(headers::REPLY_TO, self.reply_to.to_string())
            .with_header(headers::CORRELATION_ID, correlation_id);
        if !args.is_null() {
            request = request
                .with_header(headers::CONTENT_TYPE, codec::APPLICATION_JSON)
                .with_payload(codec::encode_json(args)?);
        }
        Ok(request)
    }

    fn control(&self, destination: &Cri, correlation_id: &str, command: ControlCommand) {
        self.bus.send(
            Event::new(destination.clone())
                .with_header(headers::REPLY_TO, self.reply_to.to_string())
                .with_header(headers::CORRELATION_ID, correlation_id)
                .with_header(headers::CONTROL, command.as_str()),
        );
    }
}

/// 调用方客户端。
pub struct ServiceClient {
    shared: Arc<ClientShared>,
    router: JoinHandle<()>,
    timeout: Duration,
}

impl ServiceClient {
    /// 在 `reply_to` 上监听并启动回包路由任务。
    ///
    /// `reply_to` 必须是 `service:` 资源；必须在 tokio 运行时内调用。
    pub async fn connect(bus: Arc<dyn EventBus>, reply_to: Cri) -> Result<Self, ClientError> {
        if !reply_to.is_service() {
            return Err(InvokeError::InvalidReplyTo {
                value: reply_to.to_string(),
                reason: "scheme must be `service`",
            }
            .into());
        }
        let mut inbound = bus.listen(&reply_to).await?;
        let shared = Arc::new(ClientShared {
            bus,
            reply_to,
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
        });
        let routes = Arc::clone(&shared);
        let router = tokio::spawn(async move {
            while let Some(reply) = inbound.next().await {
                let Some(correlation_id) = reply.correlation_id() else {
                    trace!(destination = %reply.destination(), "reply without correlation id ignored");
                    continue;
                };
                match routes.pending.get(correlation_id) {
                    Some(sender) => {
                        let _ = sender.send(reply);
                    }
                    None => trace!(correlation_id, "reply for unknown call ignored"),
                }
            }
        });
        Ok(Self {
            shared,
            router,
            timeout: Duration::from_secs(30),
        })
    }

    /// 调整单值调用的超时。
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 回包地址。
    pub fn reply_to(&self) -> &Cri {
        &self.shared.reply_to
    }

    /// 单值调用；`args` 为 `null` 时发送空负载。
    pub async fn call(&self, destination: Cri, args: Value) -> Result<Value, ClientError> {
        let (correlation_id, mut replies) = self.shared.register();
        let outcome = self
            .exchange(destination, &correlation_id, &args, &mut replies)
            .await;
        self.shared.pending.remove(&correlation_id);
        outcome
    }

    async fn exchange(
        &self,
        destination: Cri,
        correlation_id: &str,
        args: &Value,
        replies: &mut mpsc::UnboundedReceiver<Event>,
    ) -> Result<Value, ClientError> {
        let request = self.shared.request(destination, correlation_id, args)?;
        self.shared.bus.send(request);
        match tokio::time::timeout(self.timeout, replies.recv()).await {
            Ok(Some(reply)) => decode_reply(&reply),
            Ok(None) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::TimedOut(self.timeout)),
        }
    }

    /// 打开多值流。
    pub fn open_stream(&self, destination: Cri, args: Value) -> Result<CallStream, ClientError> {
        let (correlation_id, replies) = self.shared.register();
        let request = match self.shared.request(destination.clone(), &correlation_id, &args) {
            Ok(request) => request,
            Err(err) => {
                self.shared.pending.remove(&correlation_id);
                return Err(err.into());
            }
        };
        self.shared.bus.send(request);
        Ok(CallStream {
            shared: Arc::clone(&self.shared),
            destination,
            correlation_id,
            replies,
            finished: false,
        })
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// 打开的多值流，逐个产出值，直到收到 `complete` 或错误回包。
pub struct CallStream {
    shared: Arc<ClientShared>,
    destination: Cri,
    correlation_id: String,
    replies: mpsc::UnboundedReceiver<Event>,
    finished: bool,
}

impl CallStream {
    /// 本次流的关联标识。
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// 发送 `cancel`。
    pub fn cancel(&self) {
        self.shared
            .control(&self.destination, &self.correlation_id, ControlCommand::Cancel);
    }

    /// 发送 `suspend`。
    pub fn suspend(&self) {
        self.shared
            .control(&self.destination, &self.correlation_id, ControlCommand::Suspend);
    }

    /// 发送 `resume`。
    pub fn resume(&self) {
        self.shared
            .control(&self.destination, &self.correlation_id, ControlCommand::Resume);
    }
}

impl Stream for CallStream {
    type Item = Result<Value, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.replies.poll_recv(cx) {
            Poll::Ready(Some(reply)) => {
                if reply.control() == Some(COMPLETE) {
                    self.finished = true;
                    return Poll::Ready(None);
                }
                let item = decode_reply(&reply);
                if item.is_err() {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(ClientError::Closed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 未结束就被丢弃的流向服务端发送 `cancel`：回包地址由整个客户端共享，
/// 服务端的监听状态监控无法感知单个流的离开。
impl Drop for CallStream {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.correlation_id);
        if !self.finished {
            self.shared
                .control(&self.destination, &self.correlation_id, ControlCommand::Cancel);
        }
    }
}

/// 把回包解码为值或远端错误。
fn decode_reply(reply: &Event) -> Result<Value, ClientError> {
    if reply.is_error() {
        let descriptor = serde_json::from_slice::<ErrorDescriptor>(reply.payload()).unwrap_or_else(|_| {
            ErrorDescriptor {
                type_name: "UnknownError".to_owned(),
                message: reply.header(headers::ERROR).unwrap_or_default().to_owned(),
                code: String::new(),
                trace: None,
            }
        });
        return Err(ClientError::Remote(descriptor));
    }
    if codec::is_json(reply.header(headers::CONTENT_TYPE)) {
        Ok(codec::decode_json(reply.payload())?.unwrap_or(Value::Null))
    } else {
        Ok(codec::decode_text(reply.payload())?)
    }
}
