use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{ContainerError, ContainerResult};

/// 容器中保存的实例类型
pub type SharedBean = Arc<dyn Any + Send + Sync>;

/// Bean 的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 单例模式 - 首次获取时创建并缓存
    #[default]
    Singleton,

    /// 原型模式 - 每次获取都创建新实例
    Prototype,
}

/// Bean 工厂 trait - 用于创建 Bean 实例
#[async_trait::async_trait]
pub trait BeanFactory: Send + Sync {
    /// 创建 Bean 实例
    async fn create(&self) -> ContainerResult<SharedBean>;

    /// 获取 Bean 的类型名称
    fn type_name(&self) -> &'static str;
}

/// 基于异步闭包的工厂
pub struct FunctionFactory<T, F> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, Fut> FunctionFactory<T, F>
where
    T: Any + Send + Sync,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ContainerResult<T>> + Send + 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T, F, Fut> BeanFactory for FunctionFactory<T, F>
where
    T: Any + Send + Sync,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ContainerResult<T>> + Send + 'static,
{
    async fn create(&self) -> ContainerResult<SharedBean> {
        let value = (self.factory)().await?;
        Ok(Arc::new(value))
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// 已构建好的实例，克隆共享同一个 Arc
struct InstanceFactory {
    instance: SharedBean,
    type_name: &'static str,
}

#[async_trait::async_trait]
impl BeanFactory for InstanceFactory {
    async fn create(&self) -> ContainerResult<SharedBean> {
        Ok(Arc::clone(&self.instance))
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Bean 定义 - 描述如何创建和管理 Bean
pub struct BeanDefinition {
    /// Bean 的名称（即查找用的 token）
    pub name: String,

    /// Bean 的作用域
    pub scope: Scope,

    /// Bean 工厂
    pub factory: Box<dyn BeanFactory>,
}

impl BeanDefinition {
    /// 创建新的 Bean 定义（默认单例）
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: BeanFactory + 'static,
    {
        Self {
            name: name.into(),
            scope: Scope::default(),
            factory: Box::new(factory),
        }
    }

    /// 直接使用已有实例
    pub fn instance<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self::new(
            name,
            InstanceFactory {
                instance: Arc::new(value),
                type_name: std::any::type_name::<T>(),
            },
        )
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub(crate) fn create(&self) -> BoxFuture<'_, ContainerResult<SharedBean>> {
        Box::pin(async move {
            self.factory.create().await.map_err(|e| match e {
                ContainerError::BeanCreationFailed(_) => e,
                other => ContainerError::BeanCreationFailed(format!("{}: {}", self.name, other)),
            })
        })
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("type", &self.factory.type_name())
            .finish()
    }
}
