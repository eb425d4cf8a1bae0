//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总影响 Supervisor 行为的开关：调试回包、存活监控、流条目上限；
//! - 支持从 TOML 片段加载，缺省字段取默认值，便于嵌入宿主程序的配置文件。
//!
//! ## 设计要求（What）
//! - 所有字段均有默认值，空文档等价于 [`InvokeConfig::default`]；
//! - 未知字段视为错误，避免拼写错误被静默忽略。

use serde::Deserialize;

use crate::error::Result;

/// 服务调用协议的运行配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvokeConfig {
    /// 错误回包是否附带错误链。
    pub debug: bool,
    /// 流条目是否订阅 `reply-to` 的监听状态，调用方消失时自动终止。
    pub monitor_liveness: bool,
    /// 同时存活的流条目上限，`None` 表示不限制。
    pub max_streams: Option<usize>,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            monitor_liveness: true,
            max_streams: None,
        }
    }
}

impl InvokeConfig {
    /// 从 TOML 文本加载。
    ///
    /// # 示例
    /// ```
    /// use spark_invoke::config::InvokeConfig;
    ///
    /// let config = InvokeConfig::from_toml_str("debug = true\nmax_streams = 16").expect("valid config");
    /// assert!(config.debug);
    /// assert!(config.monitor_liveness);
    /// assert_eq!(config.max_streams, Some(16));
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_monitor_liveness(mut self, monitor: bool) -> Self {
        self.monitor_liveness = monitor;
        self
    }

    #[must_use]
    pub fn with_max_streams(mut self, limit: Option<usize>) -> Self {
        self.max_streams = limit;
        self
    }
}
