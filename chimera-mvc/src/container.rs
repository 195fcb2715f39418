//! 处理器容器
//!
//! 分发核心对外部容器的全部依赖：按 token 获取实例、判断是否存在、
//! 调用处理方法、查询处理方法声明的参数类型。

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chimera_core::{ApplicationContext, Container, SharedBean};
use futures_util::future::{BoxFuture, FutureExt};

use crate::binder::{Args, ParamType};
use crate::reply::Reply;

/// 分发核心使用的容器接口
#[async_trait]
pub trait HandlerContainer: Send + Sync {
    /// 按 token 获取实例
    async fn get(&self, token: &str) -> anyhow::Result<SharedBean>;

    /// 容器中是否存在该 token
    fn has(&self, token: &str) -> bool;

    /// 调用控制器上的处理方法
    async fn invoke(
        &self,
        controller: &str,
        method: &str,
        instance: SharedBean,
        args: Args,
    ) -> anyhow::Result<Reply>;

    /// 处理方法声明的参数类型，未注册时为空
    fn method_parameters(&self, controller: &str, method: &str) -> Vec<ParamType>;
}

type HandlerFn = Arc<dyn Fn(SharedBean, Args) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync>;

/// 一个已注册的处理方法
#[derive(Clone)]
struct HandlerDefinition {
    params: Vec<ParamType>,
    call: HandlerFn,
}

/// 处理方法表：(控制器 token, 处理方法) -> 调用闭包
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), HandlerDefinition>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理方法
    ///
    /// 闭包收到容器给出的控制器实例（已向下转型为 `C`）和绑定好的参数
    pub fn register<C, F, Fut, R>(
        &mut self,
        controller: &str,
        method: &str,
        params: Vec<ParamType>,
        handler: F,
    ) where
        C: Any + Send + Sync,
        F: Fn(Arc<C>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        let controller_name = controller.to_string();
        let call: HandlerFn = Arc::new(
            move |instance: SharedBean, args: Args| -> BoxFuture<'static, anyhow::Result<Reply>> {
                match instance.downcast::<C>() {
                    Ok(instance) => {
                        let fut = handler(instance, args);
                        async move { fut.await.map(Into::<Reply>::into) }.boxed()
                    }
                    Err(_) => {
                        let error = anyhow!(
                            "controller '{}' is not a {}",
                            controller_name,
                            std::any::type_name::<C>()
                        );
                        async move { Err(error) }.boxed()
                    }
                }
            },
        );

        let key = (controller.to_string(), method.to_string());
        if self
            .handlers
            .insert(key, HandlerDefinition { params, call })
            .is_some()
        {
            tracing::warn!(controller, handler = method, "Handler registered twice, keeping the latest");
        }
    }

    pub fn contains(&self, controller: &str, method: &str) -> bool {
        self.handlers
            .contains_key(&(controller.to_string(), method.to_string()))
    }

    fn lookup(&self, controller: &str, method: &str) -> Option<&HandlerDefinition> {
        self.handlers
            .get(&(controller.to_string(), method.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 基于 ApplicationContext 的容器实现
#[derive(Clone)]
pub struct WebContainer {
    context: Arc<ApplicationContext>,
    handlers: Arc<HandlerRegistry>,
}

impl WebContainer {
    pub fn new(context: Arc<ApplicationContext>, handlers: HandlerRegistry) -> Self {
        Self {
            context,
            handlers: Arc::new(handlers),
        }
    }

    pub fn context(&self) -> &Arc<ApplicationContext> {
        &self.context
    }
}

#[async_trait]
impl HandlerContainer for WebContainer {
    async fn get(&self, token: &str) -> anyhow::Result<SharedBean> {
        Ok(self.context.get_bean(token).await?)
    }

    fn has(&self, token: &str) -> bool {
        self.context.contains_bean(token)
    }

    async fn invoke(
        &self,
        controller: &str,
        method: &str,
        instance: SharedBean,
        args: Args,
    ) -> anyhow::Result<Reply> {
        let handler = self
            .handlers
            .lookup(controller, method)
            .ok_or_else(|| anyhow!("no handler registered for {}::{}", controller, method))?;

        (handler.call)(instance, args).await
    }

    fn method_parameters(&self, controller: &str, method: &str) -> Vec<ParamType> {
        self.handlers
            .lookup(controller, method)
            .map(|handler| handler.params.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Arg;

    struct Greeter {
        greeting: &'static str,
    }

    fn container() -> WebContainer {
        let context = ApplicationContext::new();
        context
            .register_instance("greeter", Greeter { greeting: "hello" })
            .unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "greeter",
            "greet",
            vec![ParamType::String],
            |greeter: Arc<Greeter>, args: Args| async move {
                let name = args.string(0).unwrap_or("world").to_string();
                Ok::<_, anyhow::Error>(format!("{}, {}", greeter.greeting, name))
            },
        );

        WebContainer::new(Arc::new(context), handlers)
    }

    #[tokio::test]
    async fn test_invoke_registered_handler() {
        let container = container();
        let instance = container.get("greeter").await.unwrap();

        let reply = container
            .invoke(
                "greeter",
                "greet",
                instance,
                Args::new(vec![Arg::String("chimera".to_string())]),
            )
            .await
            .unwrap();

        assert_eq!(reply, Reply::Text("hello, chimera".to_string()));
        assert_eq!(container.method_parameters("greeter", "greet").len(), 1);
        assert!(container.method_parameters("greeter", "missing").is_empty());
    }

    #[test]
    fn test_has_follows_context() {
        let container = container();
        assert!(container.has("greeter"));
        assert!(!container.has("farewell"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_handler_fails() {
        let container = container();
        let instance = container.get("greeter").await.unwrap();

        let result = container
            .invoke("greeter", "wave", instance, Args::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wrong_instance_type_fails() {
        let container = container();
        let wrong: SharedBean = Arc::new(42u8);

        let result = container
            .invoke("greeter", "greet", wrong, Args::default())
            .await;
        assert!(result.is_err());
    }
}
