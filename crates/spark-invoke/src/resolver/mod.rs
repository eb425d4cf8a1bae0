//! # resolver 模块说明
//!
//! ## 角色定位（Why）
//! - 三条可插拔的策略链：参数解析、返回值转换、异常转换；Supervisor 只与链交互，不关心具体格式；
//! - 每条链自身也实现对应 trait（组合模式），可以把一条链作为另一条链的成员嵌套。
//!
//! ## 设计要求（What）
//! - 链的 `supports` 等价于“任一成员支持”；
//! - 链的 `apply` 选择注册顺序中**第一个**支持的成员，顺序是契约的一部分；
//! - 在没有成员支持时调用 `apply` 属于编程错误，返回 [`InvokeError::IllegalState`]，不会静默成功。
//!
//! ## 风险提示（Trade-offs）
//! - 成员以 `Arc<dyn Trait>` 保存，链可以廉价克隆并在 Supervisor 与流条目之间共享；
//! - 链在 Supervisor 构建后不可变，运行期调整顺序需要重建 Supervisor。

mod argument;
mod exception;
mod return_value;

use std::{fmt, sync::Arc};

pub use argument::{
    ArgumentResolver, ArgumentResolverChain, EmptyArgumentResolver, JsonArgumentResolver,
    TextArgumentResolver,
};
pub use exception::{ErrorDescriptor, ExceptionConverter, ExceptionConverterChain, JsonExceptionConverter};
pub use return_value::{
    JsonReturnValueConverter, ReturnValueConverter, ReturnValueConverterChain,
    TextReturnValueConverter,
};

use crate::{
    config::InvokeConfig,
    error::{InvokeError, Result},
    event::{Event, Headers, headers, reply_address},
};

/// 按注册顺序排列的策略链。
pub struct ResolverChain<T: ?Sized> {
    members: Vec<Arc<T>>,
}

impl<T: ?Sized> Default for ResolverChain<T> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<T: ?Sized> Clone for ResolverChain<T> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ResolverChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverChain")
            .field("members", &self.members.len())
            .finish()
    }
}

impl<T: ?Sized> ResolverChain<T> {
    /// 空链。
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加成员，构建器风格。
    #[must_use]
    pub fn with(mut self, member: Arc<T>) -> Self {
        self.members.push(member);
        self
    }

    /// 追加成员。
    pub fn push(&mut self, member: Arc<T>) {
        self.members.push(member);
    }

    /// 成员数量。
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// 是否为空链。
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// 按注册顺序遍历成员。
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.members.iter()
    }

    /// 返回第一个满足谓词的成员，找不到时给出内部状态错误。
    fn first_supporting(&self, predicate: impl Fn(&T) -> bool) -> Result<&Arc<T>> {
        self.members
            .iter()
            .find(|member| predicate(member))
            .ok_or(InvokeError::IllegalState {
                detail: "apply called on a resolver chain without a supporting member",
            })
    }
}

/// 三条策略链的组合，Supervisor 与客户端共享。
#[derive(Clone, Debug)]
pub struct Resolvers {
    pub arguments: ArgumentResolverChain,
    pub return_values: ReturnValueConverterChain,
    pub exceptions: ExceptionConverterChain,
}

impl Resolvers {
    /// 默认链。
    ///
    /// - 参数：空负载 → JSON → 纯文本；
    /// - 返回值：JSON；
    /// - 异常：JSON，`debug` 配置决定是否附带错误链。
    pub fn defaults(config: &InvokeConfig) -> Self {
        Self {
            arguments: ArgumentResolverChain::new()
                .with(Arc::new(EmptyArgumentResolver))
                .with(Arc::new(JsonArgumentResolver))
                .with(Arc::new(TextArgumentResolver)),
            return_values: ReturnValueConverterChain::new()
                .with(Arc::new(JsonReturnValueConverter)),
            exceptions: ExceptionConverterChain::new()
                .with(Arc::new(JsonExceptionConverter::new(config.debug))),
        }
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::defaults(&InvokeConfig::default())
    }
}

/// 构造回包骨架：目的地取自请求的 `reply-to`，并复制 `correlation-id`。
pub fn reply_envelope(request: &Headers) -> Result<Event> {
    let mut reply = Event::new(reply_address(request)?);
    if let Some(correlation_id) = request.get(headers::CORRELATION_ID) {
        reply
            .headers_mut()
            .insert(headers::CORRELATION_ID, correlation_id);
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ReturnShape, ReturnType, ValueType};
    use serde_json::json;

    fn request() -> Headers {
        Headers::new()
            .with(headers::REPLY_TO, "service:caller")
            .with(headers::CORRELATION_ID, "c1")
    }

    /// 链总是选择注册顺序中第一个支持的成员。
    #[test]
    fn chain_prefers_first_supporting_member() {
        let text_first = ReturnValueConverterChain::new()
            .with(Arc::new(TextReturnValueConverter))
            .with(Arc::new(JsonReturnValueConverter));
        let string = ReturnType::new(ReturnShape::Plain, ValueType::String);
        let integer = ReturnType::new(ReturnShape::Plain, ValueType::Integer);

        let reply = text_first
            .convert(&request(), string, json!("hi"))
            .expect("text");
        assert_eq!(reply.header(headers::CONTENT_TYPE), Some(crate::codec::TEXT_PLAIN));
        assert_eq!(reply.payload().as_ref(), b"hi");

        let reply = text_first
            .convert(&request(), integer, json!(7))
            .expect("json");
        assert_eq!(reply.header(headers::CONTENT_TYPE), Some(crate::codec::APPLICATION_JSON));

        let json_first = ReturnValueConverterChain::new()
            .with(Arc::new(JsonReturnValueConverter))
            .with(Arc::new(TextReturnValueConverter));
        let reply = json_first
            .convert(&request(), string, json!("hi"))
            .expect("json");
        assert_eq!(reply.payload().as_ref(), br#""hi""#);
    }

    #[test]
    fn apply_without_supporting_member_is_illegal_state() {
        let chain = ReturnValueConverterChain::new().with(Arc::new(TextReturnValueConverter));
        let integer = ReturnType::new(ReturnShape::Plain, ValueType::Integer);

        assert!(!chain.supports(integer));
        let err = chain
            .convert(&request(), integer, json!(1))
            .expect_err("nobody supports integers");
        assert!(matches!(err, InvokeError::IllegalState { .. }));
    }

    #[test]
    fn reply_envelope_copies_correlation_id() {
        let reply = reply_envelope(&request()).expect("reply");
        assert_eq!(reply.destination().to_string(), "service:caller");
        assert_eq!(reply.correlation_id(), Some("c1"));
        assert!(reply_envelope(&Headers::new()).is_err());
    }
}
