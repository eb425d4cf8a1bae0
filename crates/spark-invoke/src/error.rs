//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为服务调用协议对外暴露的错误语义提供集中定义：分发失败、业务方法失败、流式失败、协议违规与运行异常；
//! - 每个错误变体都映射到稳定错误码（[`codes`]）与处置分类（[`ErrorKind`]），供日志聚合与错误回包复用。
//!
//! ## 设计要求（What）
//! - [`InvokeError`] 由框架自身产生，实现 `thiserror::Error`，可直接通过 `?` 传播；
//! - [`MethodError`] 由业务方法返回，携带业务类型名与消息，框架不会把它记作“意外错误”；
//! - [`Fault`] 是异常转换器的统一输入，屏蔽两类错误的差异。
//!
//! ## 风险提示（Trade-offs）
//! - 错误消息会通过 `error` 头部回传给调用方，请勿在消息中拼接敏感信息；
//! - 错误链（`trace`）仅在调试配置下回传，生产环境默认关闭。

use std::{borrow::Cow, error::Error as StdError};

use thiserror::Error;

/// 框架统一的返回值别名，默认错误类型为 [`InvokeError`]。
pub type Result<T, E = InvokeError> = std::result::Result<T, E>;

/// 错误码常量集合，遵循 `<域>.<语义>` 命名约定。
pub mod codes {
    /// 入站消息的路径未注册任何方法。
    pub const DISPATCH_MISSING_METHOD: &str = "invoke.dispatch.missing_method";
    /// 参数解析链中没有任何策略支持该消息。
    pub const DISPATCH_NO_ARGUMENT_RESOLVER: &str = "invoke.dispatch.no_argument_resolver";
    /// 返回值转换链中没有任何策略支持声明的返回类型。
    pub const DISPATCH_NO_RETURN_CONVERTER: &str = "invoke.dispatch.no_return_value_converter";
    /// 参数数量或类型与方法声明不符。
    pub const DISPATCH_ARGUMENT_MISMATCH: &str = "invoke.dispatch.argument_mismatch";
    /// 负载编解码失败。
    pub const DISPATCH_CODEC: &str = "invoke.dispatch.codec";
    /// 业务方法自身返回失败。
    pub const INVOCATION_FAILED: &str = "invoke.invocation.failed";
    /// 业务方法在阻塞线程池中 panic 或被中止。
    pub const INVOCATION_ABORTED: &str = "invoke.invocation.aborted";
    /// 流式结果在推送过程中失败。
    pub const STREAM_FAILED: &str = "invoke.stream.failed";
    /// 同时存活的流条目超过上限。
    pub const STREAM_CAPACITY_EXCEEDED: &str = "invoke.stream.capacity_exceeded";
    /// 控制头取值未知。
    pub const PROTOCOL_UNKNOWN_CONTROL: &str = "invoke.protocol.unknown_control";
    /// 缺少或非法的 `reply-to`。
    pub const PROTOCOL_INVALID_REPLY_TO: &str = "invoke.protocol.invalid_reply_to";
    /// 流式调用或控制消息缺少 `correlation-id`。
    pub const PROTOCOL_MISSING_CORRELATION_ID: &str = "invoke.protocol.missing_correlation_id";
    /// 资源标识无法解析。
    pub const PROTOCOL_INVALID_CRI: &str = "invoke.protocol.invalid_cri";
    /// 注册表构建阶段发现重名方法。
    pub const REGISTRY_DUPLICATE_METHOD: &str = "invoke.registry.duplicate_method";
    /// Supervisor 重复启动。
    pub const LIFECYCLE_ALREADY_STARTED: &str = "invoke.lifecycle.already_started";
    /// Supervisor 重复停止。
    pub const LIFECYCLE_ALREADY_STOPPED: &str = "invoke.lifecycle.already_stopped";
    /// 传输层操作失败。
    pub const TRANSPORT: &str = "invoke.transport";
    /// 配置解析失败。
    pub const CONFIG: &str = "invoke.config";
    /// 可观测性组件安装失败。
    pub const OBSERVABILITY: &str = "invoke.observability";
    /// 内部状态被违反（调用方未先检查 `supports`）。
    pub const INTERNAL_ILLEGAL_STATE: &str = "invoke.internal.illegal_state";
}

/// 错误的处置分类，对应协议文档中的错误分层。
///
/// # 契约说明（What）
/// - `Dispatch`：消息无法被分派，回包给调用方；
/// - `Invocation`：业务方法失败，回包但仅以 debug 级别记录；
/// - `Streaming`：流式结果中途失败，回包并终止流条目；
/// - `Protocol`：协议违规，能回包则回包，否则仅记录；
/// - `Fatal`：订阅异常终止等运行级异常，记录后停用 Supervisor；
/// - `Internal`：编程错误，例如在不支持的输入上调用 `apply`，不可恢复。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Dispatch,
    Invocation,
    Streaming,
    Protocol,
    Fatal,
    Internal,
}

impl ErrorKind {
    /// 是否为调用方输入或负载引起的可预期失败；其余分类意味着本端需要排查。
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            ErrorKind::Dispatch | ErrorKind::Invocation | ErrorKind::Streaming | ErrorKind::Protocol
        )
    }
}

/// 服务调用协议的核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：集中描述分派、协议、生命周期与基础设施失败，让 Supervisor 的失败边界只需面对一种类型；
/// - **契约 (What)**：每个变体都能通过 [`InvokeError::code`] 得到稳定错误码，通过 [`InvokeError::kind`] 得到处置分类；
/// - **风险 (Trade-offs)**：上下文以 `String` 保存，换取可读性；热路径上只有失败时才分配。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InvokeError {
    /// 路径未映射到任何方法。
    #[error("no method registered for path `{path}`")]
    MissingMethod { path: String },

    /// 参数解析链没有可用策略。
    #[error("no compatible argument resolver for method `{method}`")]
    NoArgumentResolver { method: String },

    /// 返回值转换链不支持声明的返回类型。
    #[error("no compatible return value converter for method `{method}`")]
    NoReturnValueConverter { method: String },

    /// 参数与方法声明不符。
    #[error("arguments for method `{method}` do not match its declaration: {detail}")]
    ArgumentMismatch { method: String, detail: String },

    /// 负载编解码失败。
    #[error("payload codec failure: {detail}")]
    Codec { detail: String },

    /// 控制头取值未知。
    #[error("unknown control value `{value}`")]
    UnknownControl { value: String },

    /// `reply-to` 缺失、为空或不是 `service:` 资源。
    #[error("invalid reply-to `{value}`: {reason}")]
    InvalidReplyTo { value: String, reason: &'static str },

    /// 流式调用或控制消息缺少 `correlation-id`。
    #[error("{context} requires a correlation id")]
    MissingCorrelationId { context: &'static str },

    /// 资源标识无法解析。
    #[error("invalid resource identifier `{input}`: {reason}")]
    InvalidCri { input: String, reason: &'static str },

    /// 注册表构建阶段出现重名方法。
    #[error("method `{method}` is registered more than once for service `{service}`")]
    DuplicateMethod { service: String, method: String },

    /// 同时存活的流条目超过上限。
    #[error("stream capacity of {limit} entries exceeded")]
    StreamCapacityExceeded { limit: usize },

    /// 业务方法在阻塞线程池中 panic 或被取消。
    #[error("method `{method}` aborted before producing a result")]
    InvocationAborted { method: String },

    /// Supervisor 已处于运行态。
    #[error("supervisor for `{service}` already started")]
    AlreadyStarted { service: String },

    /// Supervisor 已处于停止态。
    #[error("supervisor for `{service}` already stopped")]
    AlreadyStopped { service: String },

    /// 传输层失败。
    #[error("transport failure: {detail}")]
    Transport { detail: String },

    /// 配置解析失败。
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// 可观测性组件安装失败。
    #[error("observability setup failed: {detail}")]
    Observability { detail: String },

    /// 内部状态被违反。
    #[error("illegal state: {detail}")]
    IllegalState { detail: &'static str },
}

impl InvokeError {
    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            InvokeError::MissingMethod { .. } => codes::DISPATCH_MISSING_METHOD,
            InvokeError::NoArgumentResolver { .. } => codes::DISPATCH_NO_ARGUMENT_RESOLVER,
            InvokeError::NoReturnValueConverter { .. } => codes::DISPATCH_NO_RETURN_CONVERTER,
            InvokeError::ArgumentMismatch { .. } => codes::DISPATCH_ARGUMENT_MISMATCH,
            InvokeError::Codec { .. } => codes::DISPATCH_CODEC,
            InvokeError::UnknownControl { .. } => codes::PROTOCOL_UNKNOWN_CONTROL,
            InvokeError::InvalidReplyTo { .. } => codes::PROTOCOL_INVALID_REPLY_TO,
            InvokeError::MissingCorrelationId { .. } => codes::PROTOCOL_MISSING_CORRELATION_ID,
            InvokeError::InvalidCri { .. } => codes::PROTOCOL_INVALID_CRI,
            InvokeError::DuplicateMethod { .. } => codes::REGISTRY_DUPLICATE_METHOD,
            InvokeError::StreamCapacityExceeded { .. } => codes::STREAM_CAPACITY_EXCEEDED,
            InvokeError::InvocationAborted { .. } => codes::INVOCATION_ABORTED,
            InvokeError::AlreadyStarted { .. } => codes::LIFECYCLE_ALREADY_STARTED,
            InvokeError::AlreadyStopped { .. } => codes::LIFECYCLE_ALREADY_STOPPED,
            InvokeError::Transport { .. } => codes::TRANSPORT,
            InvokeError::Config(_) => codes::CONFIG,
            InvokeError::Observability { .. } => codes::OBSERVABILITY,
            InvokeError::IllegalState { .. } => codes::INTERNAL_ILLEGAL_STATE,
        }
    }

    /// 获取处置分类。
    ///
    /// # 契约说明（What）
    /// - 分类只由变体决定，与消息内容无关；
    /// - Supervisor 依据分类选择日志级别：[`ErrorKind::is_expected`] 的分类在成功回包后记为 debug，
    ///   `Fatal`/`Internal` 始终记为 warn；错误回包无法送达时一律记为 warn。
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::MissingMethod { .. }
            | InvokeError::NoArgumentResolver { .. }
            | InvokeError::NoReturnValueConverter { .. }
            | InvokeError::ArgumentMismatch { .. }
            | InvokeError::Codec { .. } => ErrorKind::Dispatch,
            InvokeError::InvocationAborted { .. } => ErrorKind::Invocation,
            InvokeError::StreamCapacityExceeded { .. } => ErrorKind::Streaming,
            InvokeError::UnknownControl { .. }
            | InvokeError::InvalidReplyTo { .. }
            | InvokeError::MissingCorrelationId { .. }
            | InvokeError::InvalidCri { .. } => ErrorKind::Protocol,
            InvokeError::AlreadyStarted { .. }
            | InvokeError::AlreadyStopped { .. }
            | InvokeError::Transport { .. }
            | InvokeError::Observability { .. } => ErrorKind::Fatal,
            InvokeError::DuplicateMethod { .. }
            | InvokeError::Config(_)
            | InvokeError::IllegalState { .. } => ErrorKind::Internal,
        }
    }

    /// 构造传输层错误的便捷方法。
    pub fn transport(detail: impl Into<String>) -> Self {
        InvokeError::Transport {
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for InvokeError {
    fn from(err: serde_json::Error) -> Self {
        InvokeError::Codec {
            detail: err.to_string(),
        }
    }
}

/// 业务方法返回的失败。
///
/// # 教案式说明
/// - **意图 (Why)**：业务失败是调用方可预期的结果，需要与框架分派失败区分，避免被当作“意外错误”高等级记录；
/// - **契约 (What)**：`type_name` 描述失败类别（例如 `"IllegalArgument"`），`message` 原样回传给调用方；
///   可选的 `source` 构成错误链，仅在调试配置下随错误描述回传；
/// - **风险 (Trade-offs)**：`type_name` 使用 `Cow<'static, str>`，静态字面量零分配，动态名称需要一次分配。
#[derive(Debug, Error)]
#[error("{type_name}: {message}")]
pub struct MethodError {
    type_name: Cow<'static, str>,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl MethodError {
    /// 以业务类型名与消息构造失败。
    pub fn new(type_name: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// 附带底层原因。
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// 业务类型名。
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// 业务消息。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<InvokeError> for MethodError {
    /// 方法实现内部调用框架 API（例如 [`crate::registry::Arguments::get`]）失败时，
    /// 以框架错误码作为类型名向上传播。
    fn from(err: InvokeError) -> Self {
        MethodError::new(err.code(), err.to_string()).with_source(err)
    }
}

/// 异常转换器的统一输入。
///
/// # 教案式说明
/// - **意图 (Why)**：异常转换器既要处理框架错误，也要处理业务错误；`Fault` 把两者折叠为
///   “类型名 + 错误码 + 消息 + 错误链”的只读快照，转换器无需感知来源；
/// - **契约 (What)**：`trace` 按 `source()` 链顺序保存每一层的 `Display` 文本，不含最外层本身；
/// - **执行 (How)**：通过 `From<&InvokeError>` 与 `From<&MethodError>` 构造，遍历 `source()` 链收集文本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    type_name: String,
    code: &'static str,
    message: String,
    trace: Vec<String>,
}

impl Fault {
    /// 直接构造故障快照，供自定义转换器或测试使用。
    pub fn new(
        type_name: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            code,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// 失败类型名。
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 面向调用方的消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 错误链文本。
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// 替换错误码，类型名、消息与错误链保持不变。
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    fn with_trace_of(mut self, err: &(dyn StdError + 'static)) -> Self {
        let mut current = err.source();
        while let Some(cause) = current {
            self.trace.push(cause.to_string());
            current = cause.source();
        }
        self
    }
}

impl From<&InvokeError> for Fault {
    fn from(err: &InvokeError) -> Self {
        Fault::new(invoke_error_type_name(err), err.code(), err.to_string()).with_trace_of(err)
    }
}

impl From<&MethodError> for Fault {
    fn from(err: &MethodError) -> Self {
        Fault::new(err.type_name(), codes::INVOCATION_FAILED, err.message()).with_trace_of(err)
    }
}

fn invoke_error_type_name(err: &InvokeError) -> &'static str {
    match err.kind() {
        ErrorKind::Dispatch => "DispatchError",
        ErrorKind::Invocation => "InvocationError",
        ErrorKind::Streaming => "StreamError",
        ErrorKind::Protocol => "ProtocolError",
        ErrorKind::Fatal => "RuntimeError",
        ErrorKind::Internal => "InternalError",
    }
}

const _: fn() = || {
    fn assert_error_traits<T: StdError + Send + Sync + 'static>() {}

    assert_error_traits::<InvokeError>();
    assert_error_traits::<MethodError>();
};
