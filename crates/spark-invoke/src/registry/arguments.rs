use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::InvokeError;

/// 参数解析链产出的有序实参，顺序与方法声明的形参一致。
///
/// # 契约说明（What）
/// - 解析链已按声明校验过数量与 [`super::ValueType`]，方法实现读取时只需关心业务类型；
/// - [`Arguments::get`] 借助 `serde_json` 反序列化为任意业务类型，失败返回
///   [`InvokeError::ArgumentMismatch`]，可通过 `?` 直接转为 [`crate::error::MethodError`]。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    method: Arc<str>,
    values: Vec<Value>,
}

impl Arguments {
    /// 构造指定方法的实参。
    pub fn new(method: impl Into<Arc<str>>, values: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            values,
        }
    }

    /// 无参数。
    pub fn empty(method: impl Into<Arc<str>>) -> Self {
        Self::new(method, Vec::new())
    }

    /// 所属方法名。
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 实参数量。
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否没有实参。
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按位置读取原始 JSON 值。
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 按位置读取并反序列化。
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, InvokeError> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| self.mismatch(format!("argument #{index} is missing")))?;
        T::deserialize(value)
            .map_err(|err| self.mismatch(format!("argument #{index}: {err}")))
    }

    /// 取出全部实参。
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn mismatch(&self, detail: String) -> InvokeError {
        InvokeError::ArgumentMismatch {
            method: self.method.to_string(),
            detail,
        }
    }
}
