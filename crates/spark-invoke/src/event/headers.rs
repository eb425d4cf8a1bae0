//! 有序、区分大小写的头部映射与协议约定的头部名称。
//!
//! ## 契约（What）
//! - 插入已存在的键会就地覆盖原值，保留原位置；
//! - 键名区分大小写，协议常量全部为小写。

use std::fmt;

/// 回包目的地，必须是 `service:` 资源。
pub const REPLY_TO: &str = "reply-to";
/// 流式结果与控制消息的关联标识。
pub const CORRELATION_ID: &str = "correlation-id";
/// 控制消息的命令：`cancel`、`suspend`、`resume`、`complete`。
pub const CONTROL: &str = "control";
/// 错误回包携带的错误消息。
pub const ERROR: &str = "error";
/// 负载的 MIME 类型。
pub const CONTENT_TYPE: &str = "content-type";
/// 调用方可接受的回包媒体类型，逗号分隔。
pub const ACCEPT: &str = "accept";

/// 有序字符串头部映射。
///
/// # 教案式说明
/// - **意图 (Why)**：协议头数量通常不超过五六个，线性表比哈希表更省内存，也能保留插入顺序便于调试输出；
/// - **契约 (What)**：[`Headers::insert`] 覆盖同名键并返回旧值；[`Headers::get`] 精确匹配键名；
/// - **风险 (Trade-offs)**：查找为 O(n)，不适合承载大量自定义头部。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// 创建空映射。
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖，返回被覆盖的旧值。
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// 构建器风格的插入。
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// 读取头部值。
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// 是否包含指定键。
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 移除并返回指定键的值。
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    /// 头部数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按插入顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}
