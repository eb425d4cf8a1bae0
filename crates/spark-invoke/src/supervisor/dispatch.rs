//! 单条入站消息的分发：控制路径与调用路径。
//!
//! # 教案式说明
//! - **意图 (Why)**：把“消息 → 方法调用 → 回包”的检查顺序集中在一处，顺序本身就是协议的一部分；
//! - **契约 (What)**：
//!   1. 没有异常转换器支持请求头时直接丢弃消息，因为无法安全地报告失败；
//!   2. 其后的分发错误都经异常转换链回包（`reply-to` 合法时），否则记录后丢弃；
//!   3. 带 `control` 头的消息走控制路径，其余消息要求合法的 `reply-to` 后走调用路径；
//!   4. 业务方法的失败与分发错误分开处理，只以 debug 级别记录，不会被误报为分发问题；
//! - **风险 (Trade-offs)**：`Plain` 方法在分发任务上同步执行，耗时方法应声明为 `Blocking` 或 `Single`。

use std::sync::Arc;

use tracing::{debug, warn};

use super::Shared;
use crate::{
    error::{Fault, InvokeError, Result},
    event::Event,
    registry::{Invocation, MethodHandle, ReturnShape},
    resolver::{ArgumentResolver, ExceptionConverter, ReturnValueConverter},
    stream::{Admission, ControlCommand, StreamEntry, StreamTicket},
};

impl Shared {
    /// 分发一条入站消息，从不等待方法结果。
    pub(crate) fn dispatch(&self, event: Event) {
        let resolvers = self.replier.resolvers();
        if !resolvers.exceptions.supports(event.headers()) {
            warn!(
                service = self.registry.service(),
                destination = %event.destination(),
                "no exception converter supports the request, message dropped"
            );
            return;
        }

        let outcome = match event.control() {
            Some(control) => self.handle_control(&event, control),
            None => self.handle_invocation(&event),
        };
        if let Err(err) = outcome {
            self.replier.reply_dispatch_error(event.headers(), &err);
        }
    }

    fn handle_control(&self, event: &Event, control: &str) -> Result<()> {
        let command: ControlCommand = control.parse()?;
        let correlation_id = event
            .correlation_id()
            .ok_or(InvokeError::MissingCorrelationId {
                context: "control message",
            })?;
        if !self.streams.send_command(correlation_id, command) {
            debug!(
                service = self.registry.service(),
                correlation_id,
                %command,
                "control message for unknown stream ignored"
            );
        }
        Ok(())
    }

    fn handle_invocation(&self, event: &Event) -> Result<()> {
        let reply_to = event.reply_to()?;
        let resolvers = self.replier.resolvers();
        let path = event.destination().path().unwrap_or_default();

        if !resolvers.arguments.supports(event) {
            return Err(InvokeError::NoArgumentResolver { method: path });
        }
        let handle = self
            .registry
            .lookup(&path)
            .cloned()
            .ok_or(InvokeError::MissingMethod { path })?;
        let return_type = handle.return_type();
        if !resolvers.return_values.supports(return_type) {
            return Err(InvokeError::NoReturnValueConverter {
                method: handle.name().to_owned(),
            });
        }

        let ticket = match return_type.shape {
            ReturnShape::Multi => match self.admit(event, &handle)? {
                Some(ticket) => Some(ticket),
                None => return Ok(()),
            },
            _ => None,
        };

        let invocation = resolvers
            .arguments
            .resolve(event, &handle)
            .map(|args| handle.invoke(args));
        let invocation = match invocation {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(method_error)) => {
                self.abandon(ticket);
                self.replier
                    .reply_method_error(event.headers(), handle.name(), &method_error);
                return Ok(());
            }
            Err(err) => {
                self.abandon(ticket);
                return Err(err);
            }
        };

        let request = event.headers().clone();
        match (invocation, ticket) {
            (Invocation::Value(value), None) => {
                self.replier.reply_value(&request, return_type, value);
            }
            (Invocation::Blocking(task), None) => {
                let replier = self.replier.clone();
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(task).await {
                        Ok(Ok(value)) => replier.reply_value(&request, return_type, value),
                        Ok(Err(err)) => replier.reply_method_error(&request, handle.name(), &err),
                        Err(join_error) => {
                            let err = InvokeError::InvocationAborted {
                                method: handle.name().to_owned(),
                            };
                            debug!(method = handle.name(), error = %join_error, "blocking method aborted");
                            replier.send_fault(&request, &Fault::from(&err));
                        }
                    }
                });
            }
            (Invocation::Deferred(future), None) => {
                let replier = self.replier.clone();
                tokio::spawn(async move {
                    match future.await {
                        Ok(value) => replier.reply_value(&request, return_type, value),
                        Err(err) => replier.reply_method_error(&request, handle.name(), &err),
                    }
                });
            }
            (Invocation::Stream(source), Some(ticket)) => {
                let entry = StreamEntry {
                    service: Arc::from(self.registry.service()),
                    method: Arc::from(handle.name()),
                    ticket,
                    request,
                    reply_to,
                    return_type,
                    source,
                    replier: self.replier.clone(),
                    table: Arc::clone(&self.streams),
                    monitor_liveness: self.config.monitor_liveness,
                };
                tokio::spawn(entry.run());
            }
            (_, ticket) => {
                self.abandon(ticket);
                return Err(InvokeError::IllegalState {
                    detail: "method produced a result that contradicts its declared shape",
                });
            }
        }
        Ok(())
    }

    /// 多值调用的准入：要求关联标识，重复标识返回 `None`（请求被忽略），超过上限返回错误。
    fn admit(&self, event: &Event, handle: &MethodHandle) -> Result<Option<StreamTicket>> {
        let correlation_id = event
            .correlation_id()
            .ok_or(InvokeError::MissingCorrelationId {
                context: "streaming invocation",
            })?;
        match self.streams.admit(correlation_id, self.config.max_streams) {
            Admission::Admitted(ticket) => Ok(Some(ticket)),
            Admission::Duplicate => {
                debug!(
                    service = self.registry.service(),
                    method = handle.name(),
                    correlation_id,
                    "stream already active for correlation id, request ignored"
                );
                Ok(None)
            }
            Admission::AtCapacity(limit) => Err(InvokeError::StreamCapacityExceeded { limit }),
        }
    }

    /// 调用未能启动条目任务时直接释放准入的槽位。
    fn abandon(&self, ticket: Option<StreamTicket>) {
        if let Some(ticket) = ticket {
            self.streams.release(&ticket.correlation_id, ticket.epoch);
        }
    }
}
