//! # observability 模块说明
//!
//! ## 角色定位（Why）
//! - 协议内部统一使用 `tracing` 事件记录生命周期、分发失败与流条目异常；
//! - 宿主若没有自己的 Subscriber，可调用 [`install_subscriber`] 一次性安装 `fmt + EnvFilter` 输出。
//!
//! ## 日志字段约定（What）
//! - 结构化字段名固定为 `service`、`method`、`correlation_id`、`reply_to` 与 `code`，Supervisor、流条目与客户端保持一致；
//! - 级别约定：生命周期为 `info`，业务失败与被忽略的重复请求为 `debug`，被丢弃的消息与运行异常为 `warn`。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::error::{InvokeError, Result};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装全局 `tracing` Subscriber。
///
/// # 教案式说明
/// - **意图 (Why)**：示例程序与集成环境需要“一行启用日志”，同时不能覆盖宿主已配置的 Subscriber；
/// - **契约 (What)**：
///   - 优先读取 `RUST_LOG`，缺失或非法时使用 `default_directives`；
///   - 重复调用，或外部已设置全局 Subscriber 时，返回 [`InvokeError::Observability`]；
/// - **执行 (How)**：组装 `registry + EnvFilter + fmt::layer` 并通过 `set_global_default` 注册。
pub fn install_subscriber(default_directives: &str) -> Result<()> {
    if INSTALLED.get().is_some() {
        return Err(observability_error("subscriber already installed by spark-invoke"));
    }
    if dispatcher::has_been_set() {
        return Err(observability_error("a global tracing subscriber is already set"));
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives)
            .map_err(|err| observability_error(format!("invalid filter directives: {err}")))?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| observability_error(err.to_string()))?;

    INSTALLED
        .set(())
        .map_err(|_| observability_error("subscriber already installed by spark-invoke"))
}

fn observability_error(detail: impl Into<String>) -> InvokeError {
    InvokeError::Observability {
        detail: detail.into(),
    }
}
