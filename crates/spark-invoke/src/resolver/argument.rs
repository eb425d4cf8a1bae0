//! 参数解析策略：把入站消息转为与方法形参一一对应的实参。
//!
//! ## 契约（What）
//! - `supports` 只看消息本身（负载与 `content-type`），因为 Supervisor 在查找方法之前就要确认解析链可用；
//! - `resolve` 结合方法句柄校验数量与 [`ValueType`]，违例返回 [`InvokeError::ArgumentMismatch`]。

use serde_json::{Map, Value};

use super::ResolverChain;
use crate::{
    codec,
    error::{InvokeError, Result},
    event::{Event, headers},
    registry::{Arguments, MethodHandle, Parameter, ValueType},
};

/// 参数解析策略。
pub trait ArgumentResolver: Send + Sync {
    /// 是否能处理该消息。
    fn supports(&self, event: &Event) -> bool;

    /// 解析实参；调用前必须确认 `supports` 为真。
    fn resolve(&self, event: &Event, handle: &MethodHandle) -> Result<Arguments>;
}

/// 参数解析链。
pub type ArgumentResolverChain = ResolverChain<dyn ArgumentResolver>;

impl ArgumentResolver for ArgumentResolverChain {
    fn supports(&self, event: &Event) -> bool {
        self.iter().any(|member| member.supports(event))
    }

    fn resolve(&self, event: &Event, handle: &MethodHandle) -> Result<Arguments> {
        self.first_supporting(|member| member.supports(event))?
            .resolve(event, handle)
    }
}

fn mismatch(handle: &MethodHandle, detail: impl Into<String>) -> InvokeError {
    InvokeError::ArgumentMismatch {
        method: handle.name().to_owned(),
        detail: detail.into(),
    }
}

fn check_type(handle: &MethodHandle, param: &Parameter, value: &Value) -> Result<()> {
    if param.ty().accepts(value) {
        Ok(())
    } else {
        Err(mismatch(
            handle,
            format!("parameter `{}` expects {}, got `{value}`", param.name(), param.ty().name()),
        ))
    }
}

/// 空负载解析：不论内容类型，负载为空即产出零个实参。
///
/// 方法声明了形参时返回 [`InvokeError::ArgumentMismatch`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyArgumentResolver;

impl ArgumentResolver for EmptyArgumentResolver {
    fn supports(&self, event: &Event) -> bool {
        event.payload().is_empty()
    }

    fn resolve(&self, _event: &Event, handle: &MethodHandle) -> Result<Arguments> {
        if handle.params().is_empty() {
            Ok(Arguments::empty(handle.name()))
        } else {
            Err(mismatch(
                handle,
                format!("expected {} argument(s), payload is empty", handle.params().len()),
            ))
        }
    }
}

/// JSON 解析。
///
/// # 教案式说明
/// - **意图 (Why)**：JSON 是默认的调用负载格式，同时支持按位置与按名称传参；
/// - **契约 (What)**：
///   - 支持 `content-type` 缺失或为 JSON 的消息；
///   - 数组按位置匹配，长度必须等于形参数量；
///   - 对象按形参名匹配，缺失或多余的键均视为不匹配；
///   - 其他 JSON 值仅在方法恰有一个形参时作为唯一实参；
///   - 空负载仅对零形参方法有效；
/// - **风险 (Trade-offs)**：单形参且类型为 [`ValueType::Json`] 时，数组负载按位置解读，
///   调用方需把数组再包一层。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonArgumentResolver;

impl ArgumentResolver for JsonArgumentResolver {
    fn supports(&self, event: &Event) -> bool {
        codec::is_json(event.header(headers::CONTENT_TYPE))
    }

    fn resolve(&self, event: &Event, handle: &MethodHandle) -> Result<Arguments> {
        let params = handle.params();
        let values = match codec::decode_json(event.payload())? {
            None if params.is_empty() => Vec::new(),
            None => {
                return Err(mismatch(
                    handle,
                    format!("expected {} argument(s), payload is empty", params.len()),
                ));
            }
            Some(Value::Array(items)) => positional(handle, items)?,
            Some(Value::Object(fields)) => named(handle, fields)?,
            Some(single) if params.len() == 1 => positional(handle, vec![single])?,
            Some(other) => {
                return Err(mismatch(
                    handle,
                    format!("expected an array or object of arguments, got `{other}`"),
                ));
            }
        };
        Ok(Arguments::new(handle.name(), values))
    }
}

fn positional(handle: &MethodHandle, items: Vec<Value>) -> Result<Vec<Value>> {
    let params = handle.params();
    if items.len() != params.len() {
        return Err(mismatch(
            handle,
            format!("expected {} argument(s), got {}", params.len(), items.len()),
        ));
    }
    for (param, value) in params.iter().zip(&items) {
        check_type(handle, param, value)?;
    }
    Ok(items)
}

fn named(handle: &MethodHandle, mut fields: Map<String, Value>) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(handle.params().len());
    for param in handle.params() {
        let value = fields
            .remove(param.name())
            .ok_or_else(|| mismatch(handle, format!("missing argument `{}`", param.name())))?;
        check_type(handle, param, &value)?;
        values.push(value);
    }
    if let Some(unexpected) = fields.keys().next() {
        return Err(mismatch(handle, format!("unexpected argument `{unexpected}`")));
    }
    Ok(values)
}

/// 纯文本解析：整个负载作为唯一的字符串实参。
#[derive(Clone, Copy, Debug, Default)]
pub struct TextArgumentResolver;

impl ArgumentResolver for TextArgumentResolver {
    fn supports(&self, event: &Event) -> bool {
        event
            .header(headers::CONTENT_TYPE)
            .is_some_and(|raw| codec::essence(raw) == "text/plain")
    }

    fn resolve(&self, event: &Event, handle: &MethodHandle) -> Result<Arguments> {
        let [param] = handle.params() else {
            return Err(mismatch(
                handle,
                format!(
                    "text payload supplies one argument, method declares {}",
                    handle.params().len()
                ),
            ));
        };
        let value = codec::decode_text(event.payload())?;
        if !matches!(param.ty(), ValueType::String | ValueType::Json) {
            return Err(mismatch(
                handle,
                format!("parameter `{}` cannot take a text payload", param.name()),
            ));
        }
        Ok(Arguments::new(handle.name(), vec![value]))
    }
}
