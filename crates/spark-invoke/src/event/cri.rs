//! 结构化资源标识（CRI）：`scheme:resource[/path]`。
//!
//! ## 契约（What）
//! - `scheme` 仅支持 `service` 与 `stream`；
//! - `resource` 为服务或队列名，不可为空且不含 `/`；
//! - `path` 可选，存储时不含前导 `/`，[`Cri::path`] 返回带 `/` 的形式，便于直接作为方法注册键。
//!
//! ## 注意事项（Trade-offs）
//! - 组件使用 `Arc<str>` 保存，克隆 CRI 不触发字符串复制；
//! - 路径只允许一段（方法名），多段路径不在本协议消费范围内，解析时按原样保留。

use std::{fmt, str::FromStr, sync::Arc};

use crate::error::InvokeError;

/// 资源标识的协议类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// 方法调用与回包。
    Service,
    /// 原始主题发布，本协议不解释。
    Stream,
}

impl Scheme {
    /// 文本形式。
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Service => "service",
            Scheme::Stream => "stream",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化资源标识。
///
/// # 教案式说明
/// - **意图 (Why)**：总线寻址、方法路由与存活监控都以 CRI 为键，集中解析可避免各处手写字符串切分；
/// - **契约 (What)**：[`Cri::address`] 去掉路径，得到总线路由与存活监控使用的“地址”；
///   `Display` 与 `FromStr` 互为逆运算；
/// - **风险 (Trade-offs)**：`Eq`/`Hash` 比较完整三元组，若需要按地址聚合请先调用 `address()`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cri {
    scheme: Scheme,
    resource: Arc<str>,
    path: Option<Arc<str>>,
}

impl Cri {
    /// 构造 `service:` 资源标识。
    pub fn service(resource: impl Into<Arc<str>>) -> Self {
        Self {
            scheme: Scheme::Service,
            resource: resource.into(),
            path: None,
        }
    }

    /// 构造 `stream:` 资源标识。
    pub fn stream(resource: impl Into<Arc<str>>) -> Self {
        Self {
            scheme: Scheme::Stream,
            resource: resource.into(),
            path: None,
        }
    }

    /// 追加方法路径，`path` 可带或不带前导 `/`。
    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim_start_matches('/');
        self.path = if trimmed.is_empty() {
            None
        } else {
            Some(Arc::from(trimmed))
        };
        self
    }

    /// 协议类型。
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// 基础资源名。
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// 带前导 `/` 的路径，例如 `/echo`。
    pub fn path(&self) -> Option<String> {
        self.path.as_ref().map(|path| format!("/{path}"))
    }

    /// 是否为 `service:` 资源。
    pub fn is_service(&self) -> bool {
        self.scheme == Scheme::Service
    }

    /// 去掉路径后的地址。
    pub fn address(&self) -> Cri {
        Cri {
            scheme: self.scheme,
            resource: Arc::clone(&self.resource),
            path: None,
        }
    }
}

impl fmt::Display for Cri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.resource)?;
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

impl FromStr for Cri {
    type Err = InvokeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvokeError::InvalidCri {
            input: input.to_owned(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty identifier"));
        }
        let (scheme, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| invalid("missing scheme separator"))?;
        let scheme = match scheme {
            "service" => Scheme::Service,
            "stream" => Scheme::Stream,
            _ => return Err(invalid("unknown scheme")),
        };
        let (resource, path) = match rest.split_once('/') {
            Some((resource, path)) => {
                if path.is_empty() {
                    return Err(invalid("empty path"));
                }
                (resource, Some(Arc::from(path)))
            }
            None => (rest, None),
        };
        if resource.is_empty() {
            return Err(invalid("empty resource"));
        }
        Ok(Cri {
            scheme,
            resource: Arc::from(resource),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_service_method_identifier() {
        let cri: Cri = "service:svcA/echo".parse().expect("valid cri");
        assert_eq!(cri.scheme(), Scheme::Service);
        assert_eq!(cri.resource(), "svcA");
        assert_eq!(cri.path().as_deref(), Some("/echo"));
        assert_eq!(cri.address(), Cri::service("svcA"));
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for input in ["", "svcA", "queue:svcA", "service:", "service:/echo", "service:svc/"] {
            let err = input.parse::<Cri>().expect_err(input);
            assert!(
                matches!(err, InvokeError::InvalidCri { .. }),
                "unexpected error for `{input}`: {err}"
            );
        }
    }

    #[test]
    fn with_path_normalizes_leading_slash() {
        let a = Cri::service("svc").with_path("/echo");
        let b = Cri::service("svc").with_path("echo");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "service:svc/echo");
    }

    proptest! {
        /// 任意合法的资源名与方法名，在 Display → FromStr 后保持不变。
        #[test]
        fn display_parse_is_stable(
            resource in "[A-Za-z0-9_.-]{1,16}",
            method in proptest::option::of("[A-Za-z0-9_]{1,16}"),
            stream in any::<bool>(),
        ) {
            let base = if stream { Cri::stream(resource.as_str()) } else { Cri::service(resource.as_str()) };
            let cri = match &method {
                Some(method) => base.with_path(method),
                None => base,
            };
            let parsed: Cri = cri.to_string().parse().expect("display output must parse");
            prop_assert_eq!(parsed, cri);
        }
    }
}
