//! 回包发送助手，Supervisor 的分发路径与流条目任务共用。
//!
//! ## 契约（What）
//! - 所有回包都经由转换链生成，目的地为请求的 `reply-to`，并复制 `correlation-id`；
//! - 值转换失败时改发错误回包，保证同一次调用“要么值、要么错误”，不会两者皆发；
//! - 错误回包本身无法生成（例如 `reply-to` 非法）时只记录 warn 日志。

use std::sync::Arc;

use serde_json::Value;
use tracing::{Level, debug, warn};

use crate::{
    bus::EventBus,
    error::{ErrorKind, Fault, InvokeError, MethodError, Result},
    event::{Headers, headers},
    registry::ReturnType,
    resolver::{ExceptionConverter, Resolvers, ReturnValueConverter, reply_envelope},
    stream::COMPLETE,
};

#[derive(Clone)]
pub(crate) struct Replier {
    bus: Arc<dyn EventBus>,
    resolvers: Arc<Resolvers>,
}

impl Replier {
    pub(crate) fn new(bus: Arc<dyn EventBus>, resolvers: Arc<Resolvers>) -> Self {
        Self { bus, resolvers }
    }

    pub(crate) fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub(crate) fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    /// 转换并发送一个值；转换失败时返回错误，不发送任何内容。
    pub(crate) fn send_value(&self, request: &Headers, return_type: ReturnType, value: Value) -> Result<()> {
        let reply = self
            .resolvers
            .return_values
            .convert(request, return_type, value)?;
        self.bus.send(reply);
        Ok(())
    }

    /// 发送一个值，转换失败时改发错误回包。
    pub(crate) fn reply_value(&self, request: &Headers, return_type: ReturnType, value: Value) {
        if let Err(err) = self.send_value(request, return_type, value) {
            self.send_fault(request, &Fault::from(&err));
        }
    }

    /// 业务方法失败：以 debug 级别记录并回包。
    pub(crate) fn reply_method_error(&self, request: &Headers, method: &str, err: &MethodError) {
        debug!(
            method,
            correlation_id = request.get(headers::CORRELATION_ID),
            error = %err,
            "method invocation failed"
        );
        self.send_fault(request, &Fault::from(err));
    }

    /// 分发失败：能回包则回包，日志级别由 `dispatch_log_level` 按错误分类决定。
    pub(crate) fn reply_dispatch_error(&self, request: &Headers, err: &InvokeError) {
        let delivered = self.send_fault(request, &Fault::from(err));
        let kind = err.kind();
        if dispatch_log_level(kind, delivered) == Level::DEBUG {
            debug!(code = err.code(), ?kind, error = %err, "dispatch error reported to caller");
        } else if delivered {
            warn!(code = err.code(), ?kind, error = %err, "dispatch error reported to caller");
        } else {
            warn!(
                code = err.code(),
                ?kind,
                error = %err,
                "dispatch error dropped, caller cannot be reached"
            );
        }
    }

    /// 发送错误回包，返回是否成功生成并投递。
    pub(crate) fn send_fault(&self, request: &Headers, fault: &Fault) -> bool {
        if !self.resolvers.exceptions.supports(request) {
            warn!(code = fault.code(), "no exception converter supports the request, error reply dropped");
            return false;
        }
        match self.resolvers.exceptions.convert(request, fault) {
            Ok(reply) => {
                self.bus.send(reply);
                true
            }
            Err(err) => {
                warn!(
                    code = fault.code(),
                    reply_to = request.get(headers::REPLY_TO),
                    error = %err,
                    "unable to build error reply"
                );
                false
            }
        }
    }

    /// 发送 `control=complete`。
    pub(crate) fn send_complete(&self, request: &Headers) -> Result<()> {
        let reply = reply_envelope(request)?.with_header(headers::CONTROL, COMPLETE);
        self.bus.send(reply);
        Ok(())
    }
}

/// 分发失败的日志级别：可预期的分类在回包送达后只记 debug。
fn dispatch_log_level(kind: ErrorKind, delivered: bool) -> Level {
    if delivered && kind.is_expected() {
        Level::DEBUG
    } else {
        Level::WARN
    }
}
