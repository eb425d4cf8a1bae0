//! 异常转换策略：把 [`Fault`] 转为带 `error` 头的回包。
//!
//! # 教案式说明
//! - **意图 (Why)**：Supervisor 只有在至少一个异常转换器支持请求头时才处理消息，否则无法安全地报告失败；
//! - **契约 (What)**：
//!   - 回包携带 `error` 头（错误消息）与序列化的 [`ErrorDescriptor`]；
//!   - 错误链仅在调试配置下写入 `trace` 字段；
//! - **风险 (Trade-offs)**：错误消息原样回传，业务方法不应在消息中放入敏感数据。

use serde::{Deserialize, Serialize};

use super::{ResolverChain, reply_envelope};
use crate::{
    codec,
    error::{Fault, Result},
    event::{Event, Headers, headers},
};

/// 异常转换策略。
pub trait ExceptionConverter: Send + Sync {
    /// 是否能为该请求生成错误回包。
    fn supports(&self, request: &Headers) -> bool;

    /// 生成错误回包；请求缺少合法 `reply-to` 时失败。
    fn convert(&self, request: &Headers, fault: &Fault) -> Result<Event>;
}

/// 异常转换链。
pub type ExceptionConverterChain = ResolverChain<dyn ExceptionConverter>;

impl ExceptionConverter for ExceptionConverterChain {
    fn supports(&self, request: &Headers) -> bool {
        self.iter().any(|member| member.supports(request))
    }

    fn convert(&self, request: &Headers, fault: &Fault) -> Result<Event> {
        self.first_supporting(|member| member.supports(request))?
            .convert(request, fault)
    }
}

/// 错误回包的负载结构。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
}

impl ErrorDescriptor {
    /// 由故障快照构造，`include_trace` 为假时丢弃错误链。
    pub fn from_fault(fault: &Fault, include_trace: bool) -> Self {
        Self {
            type_name: fault.type_name().to_owned(),
            message: fault.message().to_owned(),
            code: fault.code().to_owned(),
            trace: include_trace.then(|| fault.trace().to_vec()),
        }
    }
}

/// JSON 异常转换。
///
/// 请求带有 `accept` 头且不接受 `application/json` 时不支持该请求。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonExceptionConverter {
    include_trace: bool,
}

impl JsonExceptionConverter {
    /// `include_trace` 对应调试配置。
    pub fn new(include_trace: bool) -> Self {
        Self { include_trace }
    }
}

impl ExceptionConverter for JsonExceptionConverter {
    fn supports(&self, request: &Headers) -> bool {
        codec::accepts(request.get(headers::ACCEPT), codec::APPLICATION_JSON)
    }

    fn convert(&self, request: &Headers, fault: &Fault) -> Result<Event> {
        let descriptor = ErrorDescriptor::from_fault(fault, self.include_trace);
        let payload = serde_json::to_vec(&descriptor)?;
        Ok(reply_envelope(request)?
            .with_header(headers::ERROR, fault.message())
            .with_header(headers::CONTENT_TYPE, codec::APPLICATION_JSON)
            .with_payload(payload))
    }
}
