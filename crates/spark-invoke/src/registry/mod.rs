//! # registry 模块说明
//!
//! ## 角色定位（Why）
//! - 把服务描述一次性构建为“路径 → 方法句柄”的不可变表，替代运行期反射；
//! - Supervisor 与解析链只接触 [`MethodHandle`]，不感知服务实现类型。
//!
//! ## 设计要求（What）
//! - 注册键为 `"/" + 方法名`；
//! - 具体方法覆盖同名接口方法；同一层内重名返回 [`InvokeError::DuplicateMethod`]；
//! - 构建完成后只读，可通过 `Arc` 在任务间共享。

mod arguments;
mod descriptor;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::debug;

pub use arguments::Arguments;
pub use descriptor::{
    Invocation, MethodDescriptor, MethodHandle, Parameter, ReturnShape, ReturnType,
    ServiceDescriptor, ValueType,
};

use crate::error::{InvokeError, Result};

/// 服务的方法注册表。
#[derive(Debug)]
pub struct MethodRegistry {
    service: Arc<str>,
    methods: HashMap<String, Arc<MethodHandle>>,
}

impl MethodRegistry {
    /// 由服务描述构建注册表。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：把“接口声明 + 具体实现”的覆盖关系在构建期一次解决，运行期查表即可；
    /// - **契约 (What)**：
    ///   - 每个方法都向实例提供者索取一次实例并绑定；
    ///   - 接口层与具体层各自做重名检查，跨层同名视为覆盖；
    /// - **执行 (How)**：先登记接口方法，再以具体方法覆盖，最后冻结为 `HashMap`。
    pub fn build<S: Send + Sync + 'static>(descriptor: ServiceDescriptor<S>) -> Result<Self> {
        let parts = descriptor.into_parts();
        ensure_unique(&parts.name, &parts.interface)?;
        ensure_unique(&parts.name, &parts.concrete)?;

        let mut methods = HashMap::new();
        for method in parts.interface.into_iter().chain(parts.concrete) {
            let handle = method.bind(Arc::clone(&parts.name), (parts.provider)());
            if let Some(previous) = methods.insert(handle.path().to_owned(), Arc::new(handle)) {
                debug!(
                    service = %parts.name,
                    method = previous.name(),
                    "interface method overridden by concrete method"
                );
            }
        }
        Ok(Self {
            service: parts.name,
            methods,
        })
    }

    /// 服务名。
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 按路径查找句柄，路径形如 `/echo`。
    pub fn lookup(&self, path: &str) -> Option<&Arc<MethodHandle>> {
        self.methods.get(path)
    }

    /// 已注册的路径。
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// 方法数量。
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn ensure_unique<S: Send + Sync + 'static>(
    service: &str,
    layer: &[MethodDescriptor<S>],
) -> Result<()> {
    let mut seen = HashSet::with_capacity(layer.len());
    for method in layer {
        if !seen.insert(method.name()) {
            return Err(InvokeError::DuplicateMethod {
                service: service.to_owned(),
                method: method.name().to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MethodError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter;

    fn greet(label: &'static str) -> MethodDescriptor<Greeter> {
        MethodDescriptor::plain("greet", ValueType::String, move |_, _| {
            Ok::<_, MethodError>(label)
        })
    }

    #[test]
    fn concrete_method_overrides_interface_method() {
        let registry = MethodRegistry::build(
            ServiceDescriptor::with_instance("greeter", Arc::new(Greeter))
                .interface_method(greet("interface"))
                .method(greet("concrete")),
        )
        .expect("registry");

        assert_eq!(registry.len(), 1);
        let handle = registry.lookup("/greet").expect("registered");
        match handle.invoke(Arguments::empty("greet")) {
            Ok(Invocation::Value(value)) => assert_eq!(value, json!("concrete")),
            other => panic!("unexpected invocation: {other:?}"),
        }
        assert!(registry.lookup("greet").is_none());
    }

    #[test]
    fn duplicate_within_one_layer_is_rejected() {
        let err = MethodRegistry::build(
            ServiceDescriptor::with_instance("greeter", Arc::new(Greeter))
                .method(greet("a"))
                .method(greet("b")),
        )
        .expect_err("duplicate");
        assert!(matches!(
            err,
            InvokeError::DuplicateMethod { ref method, .. } if method == "greet"
        ));
    }

    #[test]
    fn provider_is_consulted_for_every_method() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let descriptor = ServiceDescriptor::new("greeter", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Greeter)
        })
        .method(greet("a"))
        .method(MethodDescriptor::plain("other", ValueType::Unit, |_, _| {
            Ok::<_, MethodError>(())
        }));

        MethodRegistry::build(descriptor).expect("registry");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
