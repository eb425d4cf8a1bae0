//! 返回值转换策略：把方法产出的值转为发往 `reply-to` 的回包。

use serde_json::Value;

use super::{ResolverChain, reply_envelope};
use crate::{
    codec,
    error::Result,
    event::{Event, Headers, headers},
    registry::{ReturnType, ValueType},
};

/// 返回值转换策略。
///
/// # 契约说明（What）
/// - `supports` 只依据声明的返回类型判断，Supervisor 在调用方法**之前**检查，避免方法产生副作用后才发现无法回包；
/// - `convert` 决定 `content-type` 并序列化负载；回包目的地与 `correlation-id` 由 [`reply_envelope`] 统一填充；
/// - 多值流的每个元素都以原始调用声明的返回类型转换。
pub trait ReturnValueConverter: Send + Sync {
    fn supports(&self, return_type: ReturnType) -> bool;

    fn convert(&self, request: &Headers, return_type: ReturnType, value: Value) -> Result<Event>;
}

/// 返回值转换链。
pub type ReturnValueConverterChain = ResolverChain<dyn ReturnValueConverter>;

impl ReturnValueConverter for ReturnValueConverterChain {
    fn supports(&self, return_type: ReturnType) -> bool {
        self.iter().any(|member| member.supports(return_type))
    }

    fn convert(&self, request: &Headers, return_type: ReturnType, value: Value) -> Result<Event> {
        self.first_supporting(|member| member.supports(return_type))?
            .convert(request, return_type, value)
    }
}

/// JSON 转换，支持任意元素类型。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonReturnValueConverter;

impl ReturnValueConverter for JsonReturnValueConverter {
    fn supports(&self, _return_type: ReturnType) -> bool {
        true
    }

    fn convert(&self, request: &Headers, _return_type: ReturnType, value: Value) -> Result<Event> {
        let payload = codec::encode_json(&value)?;
        Ok(reply_envelope(request)?
            .with_header(headers::CONTENT_TYPE, codec::APPLICATION_JSON)
            .with_payload(payload))
    }
}

/// 纯文本转换，仅支持字符串元素。
#[derive(Clone, Copy, Debug, Default)]
pub struct TextReturnValueConverter;

impl ReturnValueConverter for TextReturnValueConverter {
    fn supports(&self, return_type: ReturnType) -> bool {
        return_type.element == ValueType::String
    }

    fn convert(&self, request: &Headers, _return_type: ReturnType, value: Value) -> Result<Event> {
        let payload = codec::encode_text(&value)?;
        Ok(reply_envelope(request)?
            .with_header(headers::CONTENT_TYPE, codec::TEXT_PLAIN)
            .with_payload(payload))
    }
}
