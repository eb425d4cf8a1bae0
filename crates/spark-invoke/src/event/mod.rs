//! # event 模块说明
//!
//! ## 角色定位（Why）
//! - 描述在总线上流转的“寻址消息”：目的地、头部与不透明负载；
//! - 协议的所有组件（Supervisor、解析链、流条目、客户端）都只通过 [`Event`] 交换数据。
//!
//! ## 设计要求（What）
//! - `service:` 带路径的目的地表示调用或回包，`stream:` 目的地是原始主题发布，协议层不解释；
//! - 负载使用 [`bytes::Bytes`]，克隆与扇出不复制底层缓冲。

pub mod cri;
pub mod headers;

use bytes::Bytes;

pub use cri::{Cri, Scheme};
pub use headers::Headers;

use crate::error::{InvokeError, Result};

/// 总线上的寻址消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    destination: Cri,
    headers: Headers,
    payload: Bytes,
}

impl Event {
    /// 以目的地构造空消息。
    pub fn new(destination: Cri) -> Self {
        Self {
            destination,
            headers: Headers::new(),
            payload: Bytes::new(),
        }
    }

    /// 设置单个头部。
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// 整体替换头部。
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// 设置负载。
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// 目的地。
    pub fn destination(&self) -> &Cri {
        &self.destination
    }

    /// 头部。
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// 可变头部。
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// 负载。
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 读取单个头部。
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// 关联标识。
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(headers::CORRELATION_ID)
    }

    /// 控制头取值。
    pub fn control(&self) -> Option<&str> {
        self.header(headers::CONTROL)
    }

    /// 是否为错误回包。
    pub fn is_error(&self) -> bool {
        self.headers.contains(headers::ERROR)
    }

    /// 解析并校验 `reply-to`，规则见 [`reply_address`]。
    pub fn reply_to(&self) -> Result<Cri> {
        reply_address(&self.headers)
    }
}

/// 从请求头解析回包目的地。
///
/// # 契约说明（What）
/// - 头部缺失、为空白或不是 `service:` 资源时返回 [`InvokeError::InvalidReplyTo`]；
/// - 校验通过的目的地可直接作为回包消息的 `destination`。
pub fn reply_address(request: &Headers) -> Result<Cri> {
    let invalid = |value: &str, reason| InvokeError::InvalidReplyTo {
        value: value.to_owned(),
        reason,
    };
    let raw = request
        .get(headers::REPLY_TO)
        .ok_or_else(|| invalid("", "header missing"))?;
    if raw.trim().is_empty() {
        return Err(invalid(raw, "header is blank"));
    }
    let cri: Cri = raw
        .parse()
        .map_err(|_| invalid(raw, "not a resource identifier"))?;
    if !cri.is_service() {
        return Err(invalid(raw, "scheme must be `service`"));
    }
    Ok(cri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_to_requires_service_scheme() {
        let base = Event::new(Cri::service("svc").with_path("echo"));

        assert!(matches!(
            base.reply_to(),
            Err(InvokeError::InvalidReplyTo { reason: "header missing", .. })
        ));
        assert!(matches!(
            base.clone().with_header(headers::REPLY_TO, "  ").reply_to(),
            Err(InvokeError::InvalidReplyTo { reason: "header is blank", .. })
        ));
        assert!(matches!(
            base.clone().with_header(headers::REPLY_TO, "stream:topic").reply_to(),
            Err(InvokeError::InvalidReplyTo { .. })
        ));

        let ok = base
            .with_header(headers::REPLY_TO, "service:caller/reply")
            .reply_to()
            .expect("valid reply-to");
        assert_eq!(ok.resource(), "caller");
    }
}
