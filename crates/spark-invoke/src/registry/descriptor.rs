//! 方法的类型化描述：形参、声明的返回形态，以及绑定实例后的可调用句柄。
//!
//! # 教案式说明
//! - **意图 (Why)**：调用方式（同步、阻塞、单值异步、多值流）在注册时显式声明，
//!   Supervisor 按声明分类结果，不在运行期探测返回值的类型；
//! - **契约 (What)**：
//!   - [`MethodDescriptor`] 描述“未绑定实例”的方法，泛型参数 `S` 为服务实现类型；
//!   - [`MethodHandle`] 由注册表在构建时绑定实例后产出，构建后不可变；
//!   - 业务闭包的返回值需实现 `Serialize`，在句柄内部转为 `serde_json::Value`；
//! - **风险 (Trade-offs)**：每个句柄持有一层 `Arc<dyn Fn>` 间接调用，换取异构方法放入同一张表。

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, Stream, StreamExt, future::BoxFuture, stream::BoxStream};
use serde::Serialize;
use serde_json::Value;

use super::Arguments;
use crate::error::{InvokeError, MethodError};

/// 形参与返回元素的取值类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 无值，对应 JSON `null`。
    Unit,
    Bool,
    /// 有符号或无符号整数。
    Integer,
    /// 任意数字。
    Float,
    String,
    /// 任意 JSON 值。
    Json,
}

impl ValueType {
    /// 判断 JSON 值是否符合该类型。
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Unit => value.is_null(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Json => true,
        }
    }

    /// 用于错误消息的类型名。
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Unit => "unit",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Json => "json",
        }
    }
}

/// 声明的返回形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// 同步返回单个值。
    Plain,
    /// 同步但必须在阻塞线程池中执行。
    Blocking,
    /// 单值异步。
    Single,
    /// 多值流。
    Multi,
}

/// 声明的返回类型：形态 + 元素类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReturnType {
    pub shape: ReturnShape,
    pub element: ValueType,
}

impl ReturnType {
    pub const fn new(shape: ReturnShape, element: ValueType) -> Self {
        Self { shape, element }
    }
}

/// 形参声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    name: Arc<str>,
    ty: ValueType,
}

impl Parameter {
    pub fn new(name: impl Into<Arc<str>>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }
}

/// 方法调用的即时结果，由句柄按声明的形态产出。
pub enum Invocation {
    /// `Plain`：值已经就绪。
    Value(Value),
    /// `Blocking`：交给阻塞线程池执行的闭包。
    Blocking(Box<dyn FnOnce() -> Result<Value, MethodError> + Send + 'static>),
    /// `Single`：尚未完成的单值结果。
    Deferred(BoxFuture<'static, Result<Value, MethodError>>),
    /// `Multi`：惰性的多值流，被拉取时才产出。
    Stream(BoxStream<'static, Result<Value, MethodError>>),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Invocation::Blocking(_) => f.write_str("Blocking(..)"),
            Invocation::Deferred(_) => f.write_str("Deferred(..)"),
            Invocation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

type Target<S> = Arc<dyn Fn(Arc<S>, Arguments) -> Result<Invocation, MethodError> + Send + Sync>;
type Invoker = Box<dyn Fn(Arguments) -> Result<Invocation, MethodError> + Send + Sync>;

fn to_value<R: Serialize>(value: R) -> Result<Value, MethodError> {
    serde_json::to_value(value).map_err(|err| MethodError::from(InvokeError::from(err)))
}

/// 未绑定实例的方法描述。
///
/// # 使用示例
/// ```
/// use spark_invoke::registry::{MethodDescriptor, ValueType};
///
/// struct Greeter;
///
/// let hello = MethodDescriptor::<Greeter>::plain("hello", ValueType::String, |_, args| {
///     let name: String = args.get(0)?;
///     Ok(format!("hello {name}"))
/// })
/// .param("name", ValueType::String);
/// assert_eq!(hello.name(), "hello");
/// ```
pub struct MethodDescriptor<S> {
    name: Arc<str>,
    params: Vec<Parameter>,
    return_type: ReturnType,
    target: Target<S>,
}

impl<S> Clone for MethodDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            params: self.params.clone(),
            return_type: self.return_type,
            target: Arc::clone(&self.target),
        }
    }
}

impl<S> fmt::Debug for MethodDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

impl<S: Send + Sync + 'static> MethodDescriptor<S> {
    /// 同步方法，在分发任务中直接执行。
    pub fn plain<F, R>(name: impl Into<Arc<str>>, element: ValueType, method: F) -> Self
    where
        F: Fn(&S, Arguments) -> Result<R, MethodError> + Send + Sync + 'static,
        R: Serialize,
    {
        Self::from_target(
            name,
            ReturnType::new(ReturnShape::Plain, element),
            Arc::new(move |instance: Arc<S>, args: Arguments| {
                method(&instance, args).and_then(to_value).map(Invocation::Value)
            }),
        )
    }

    /// 阻塞方法，交给 `spawn_blocking` 执行。
    pub fn blocking<F, R>(name: impl Into<Arc<str>>, element: ValueType, method: F) -> Self
    where
        F: Fn(&S, Arguments) -> Result<R, MethodError> + Send + Sync + 'static,
        R: Serialize,
    {
        let method = Arc::new(method);
        Self::from_target(
            name,
            ReturnType::new(ReturnShape::Blocking, element),
            Arc::new(move |instance: Arc<S>, args: Arguments| {
                let method = Arc::clone(&method);
                Ok(Invocation::Blocking(Box::new(move || {
                    method(&instance, args).and_then(to_value)
                })))
            }),
        )
    }

    /// 单值异步方法。
    pub fn single<F, Fut, R>(name: impl Into<Arc<str>>, element: ValueType, method: F) -> Self
    where
        F: Fn(Arc<S>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        Self::from_target(
            name,
            ReturnType::new(ReturnShape::Single, element),
            Arc::new(move |instance: Arc<S>, args: Arguments| {
                let future = method(instance, args);
                Ok(Invocation::Deferred(
                    async move { future.await.and_then(to_value) }.boxed(),
                ))
            }),
        )
    }

    /// 多值流方法；闭包可同步失败，也可在流中途产出错误。
    pub fn multi<F, St, R>(name: impl Into<Arc<str>>, element: ValueType, method: F) -> Self
    where
        F: Fn(Arc<S>, Arguments) -> Result<St, MethodError> + Send + Sync + 'static,
        St: Stream<Item = Result<R, MethodError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        Self::from_target(
            name,
            ReturnType::new(ReturnShape::Multi, element),
            Arc::new(move |instance: Arc<S>, args: Arguments| {
                let source = method(instance, args)?;
                Ok(Invocation::Stream(
                    source.map(|item| item.and_then(to_value)).boxed(),
                ))
            }),
        )
    }

    fn from_target(name: impl Into<Arc<str>>, return_type: ReturnType, target: Target<S>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            return_type,
            target,
        }
    }

    /// 追加形参声明，顺序即位置。
    pub fn param(mut self, name: impl Into<Arc<str>>, ty: ValueType) -> Self {
        self.params.push(Parameter::new(name, ty));
        self
    }

    /// 方法名（不含 `/`）。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 声明的返回类型。
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// 绑定实例，产出可调用句柄。
    pub(crate) fn bind(self, service: Arc<str>, instance: Arc<S>) -> MethodHandle {
        let target = self.target;
        MethodHandle {
            service,
            path: format!("/{}", self.name),
            name: self.name,
            params: self.params,
            return_type: self.return_type,
            invoker: Box::new(move |args: Arguments| target(Arc::clone(&instance), args)),
        }
    }
}

/// 绑定实例后的方法句柄。
pub struct MethodHandle {
    service: Arc<str>,
    name: Arc<str>,
    path: String,
    params: Vec<Parameter>,
    return_type: ReturnType,
    invoker: Invoker,
}

impl MethodHandle {
    /// 所属服务名。
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 方法名。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册键，`"/" + name`。
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 形参声明。
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// 声明的返回类型。
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// 以解析好的实参调用。
    ///
    /// # 契约说明（What）
    /// - `Plain` 方法在当前调用栈上执行完毕；其余形态只构造待执行的结果，不在调用栈上阻塞或等待；
    /// - 同步失败直接返回 `Err`，异步失败体现在 [`Invocation`] 内部。
    pub fn invoke(&self, args: Arguments) -> Result<Invocation, MethodError> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandle")
            .field("service", &self.service)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

/// 服务描述：服务名、实例提供者、接口方法与具体方法。
///
/// # 契约说明（What）
/// - 具体方法与接口方法同名时，具体方法覆盖接口方法；
/// - 同一层内重名在注册表构建时报 [`InvokeError::DuplicateMethod`]。
pub struct ServiceDescriptor<S> {
    name: Arc<str>,
    provider: Arc<dyn Fn() -> Arc<S> + Send + Sync>,
    interface: Vec<MethodDescriptor<S>>,
    concrete: Vec<MethodDescriptor<S>>,
}

impl<S: Send + Sync + 'static> ServiceDescriptor<S> {
    /// 以实例提供者构造。
    pub fn new<P>(name: impl Into<Arc<str>>, provider: P) -> Self
    where
        P: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            provider: Arc::new(provider),
            interface: Vec::new(),
            concrete: Vec::new(),
        }
    }

    /// 以共享实例构造。
    pub fn with_instance(name: impl Into<Arc<str>>, instance: Arc<S>) -> Self {
        Self::new(name, move || Arc::clone(&instance))
    }

    /// 声明接口方法。
    pub fn interface_method(mut self, method: MethodDescriptor<S>) -> Self {
        self.interface.push(method);
        self
    }

    /// 声明具体方法。
    pub fn method(mut self, method: MethodDescriptor<S>) -> Self {
        self.concrete.push(method);
        self
    }

    /// 服务名。
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> ServiceParts<S> {
        ServiceParts {
            name: self.name,
            provider: self.provider,
            interface: self.interface,
            concrete: self.concrete,
        }
    }
}

pub(crate) struct ServiceParts<S> {
    pub(crate) name: Arc<str>,
    pub(crate) provider: Arc<dyn Fn() -> Arc<S> + Send + Sync>,
    pub(crate) interface: Vec<MethodDescriptor<S>>,
    pub(crate) concrete: Vec<MethodDescriptor<S>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    struct Counter {
        step: i64,
    }

    #[test]
    fn value_type_accepts_matching_json() {
        assert!(ValueType::Integer.accepts(&json!(3)));
        assert!(!ValueType::Integer.accepts(&json!(3.5)));
        assert!(ValueType::Float.accepts(&json!(3)));
        assert!(ValueType::Unit.accepts(&Value::Null));
        assert!(ValueType::Json.accepts(&json!({"a": 1})));
        assert!(!ValueType::String.accepts(&json!(1)));
    }

    #[test]
    fn plain_handle_uses_bound_instance() {
        let handle = MethodDescriptor::<Counter>::plain("next", ValueType::Integer, |counter, args| {
            let base: i64 = args.get(0)?;
            Ok(base + counter.step)
        })
        .param("base", ValueType::Integer)
        .bind(Arc::from("svc"), Arc::new(Counter { step: 2 }));

        assert_eq!(handle.path(), "/next");
        match handle.invoke(Arguments::new("next", vec![json!(40)])) {
            Ok(Invocation::Value(value)) => assert_eq!(value, json!(42)),
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn multi_handle_is_lazy_and_serializes_items() {
        let handle = MethodDescriptor::<Counter>::multi("count", ValueType::Integer, |counter, _| {
            let step = counter.step;
            Ok(stream::iter((1..=3).map(move |n| Ok::<_, MethodError>(n * step))))
        })
        .bind(Arc::from("svc"), Arc::new(Counter { step: 1 }));

        let Ok(Invocation::Stream(source)) = handle.invoke(Arguments::empty("count")) else {
            panic!("expected a stream");
        };
        let items: Vec<_> = source.map(|item| item.expect("item")).collect().await;
        assert_eq!(items, [json!(1), json!(2), json!(3)]);
    }
}
