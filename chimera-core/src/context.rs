use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;

use crate::bean::{BeanDefinition, FunctionFactory, Scope, SharedBean};
use crate::config::Environment;
use crate::error::{ContainerError, ContainerResult};

/// 容器 trait - 定义依赖注入容器的核心接口
#[async_trait::async_trait]
pub trait Container: Send + Sync {
    /// 注册 Bean 定义
    fn register(&self, definition: BeanDefinition) -> ContainerResult<()>;

    /// 通过名称获取 Bean
    async fn get_bean(&self, name: &str) -> ContainerResult<SharedBean>;

    /// 检查是否包含指定名称的 Bean
    fn contains_bean(&self, name: &str) -> bool;

    /// 获取所有 Bean 的名称
    fn get_bean_names(&self) -> Vec<String>;
}

/// 单个 Bean 的注册项，单例实例懒加载后缓存在 `instance` 中
struct BeanEntry {
    definition: BeanDefinition,
    instance: OnceCell<SharedBean>,
}

/// 应用上下文 - Container 的默认实现
///
/// 持有所有 Bean 定义和配置环境。单例在首次获取时创建，
/// 同一个单例的并发首次获取只会触发一次工厂调用。
pub struct ApplicationContext {
    beans: RwLock<HashMap<String, Arc<BeanEntry>>>,
    environment: Arc<Environment>,
}

impl ApplicationContext {
    /// 使用空配置创建上下文
    pub fn new() -> Self {
        Self::with_environment(Arc::new(Environment::new()))
    }

    /// 使用指定的 Environment 创建上下文
    pub fn with_environment(environment: Arc<Environment>) -> Self {
        Self {
            beans: RwLock::new(HashMap::new()),
            environment,
        }
    }

    /// 获取 Environment
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// 注册单例 Bean
    pub fn register_singleton<T, F, Fut>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ContainerResult<T>> + Send + 'static,
    {
        let definition = BeanDefinition::new(name, FunctionFactory::new(factory))
            .with_scope(Scope::Singleton);
        self.register(definition)
    }

    /// 注册原型 Bean，每次获取都会调用工厂
    pub fn register_prototype<T, F, Fut>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ContainerResult<T>> + Send + 'static,
    {
        let definition = BeanDefinition::new(name, FunctionFactory::new(factory))
            .with_scope(Scope::Prototype);
        self.register(definition)
    }

    /// 注册一个已经构建好的实例
    pub fn register_instance<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> ContainerResult<()> {
        self.register(BeanDefinition::instance(name, value))
    }

    /// 获取 Bean 并向下转型为具体类型
    pub async fn get_bean_typed<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        let bean = self.get_bean(name).await?;
        bean.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    fn entry(&self, name: &str) -> ContainerResult<Arc<BeanEntry>> {
        self.beans
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::BeanNotFound(name.to_string()))
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Container for ApplicationContext {
    fn register(&self, definition: BeanDefinition) -> ContainerResult<()> {
        let mut beans = self.beans.write();
        if beans.contains_key(&definition.name) {
            return Err(ContainerError::DuplicateBean(definition.name));
        }

        tracing::debug!(bean = %definition.name, scope = ?definition.scope, "Registered bean");
        beans.insert(
            definition.name.clone(),
            Arc::new(BeanEntry {
                definition,
                instance: OnceCell::new(),
            }),
        );
        Ok(())
    }

    async fn get_bean(&self, name: &str) -> ContainerResult<SharedBean> {
        let entry = self.entry(name)?;

        match entry.definition.scope {
            Scope::Prototype => entry.definition.create().await,
            Scope::Singleton => {
                let instance = entry
                    .instance
                    .get_or_try_init(|| entry.definition.create())
                    .await?;
                Ok(Arc::clone(instance))
            }
        }
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.beans.read().contains_key(name)
    }

    fn get_bean_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.beans.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter {
        id: usize,
    }

    #[tokio::test]
    async fn test_singleton_created_once() {
        let context = ApplicationContext::new();
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = Arc::clone(&created);

        context
            .register_singleton("counter", move || {
                let created = Arc::clone(&created_clone);
                async move {
                    let id = created.fetch_add(1, Ordering::SeqCst);
                    Ok(Counter { id })
                }
            })
            .unwrap();

        let a = context.get_bean_typed::<Counter>("counter").await.unwrap();
        let b = context.get_bean_typed::<Counter>("counter").await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id, 0);
    }

    #[tokio::test]
    async fn test_prototype_created_per_lookup() {
        let context = ApplicationContext::new();
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = Arc::clone(&created);

        context
            .register_prototype("counter", move || {
                let created = Arc::clone(&created_clone);
                async move {
                    let id = created.fetch_add(1, Ordering::SeqCst);
                    Ok(Counter { id })
                }
            })
            .unwrap();

        let a = context.get_bean_typed::<Counter>("counter").await.unwrap();
        let b = context.get_bean_typed::<Counter>("counter").await.unwrap();

        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
    }

    #[tokio::test]
    async fn test_missing_and_mismatched_beans() {
        let context = ApplicationContext::new();
        context.register_instance("answer", 42u32).unwrap();

        assert!(context.contains_bean("answer"));
        assert!(!context.contains_bean("question"));

        let missing = context.get_bean("question").await;
        assert!(matches!(missing, Err(ContainerError::BeanNotFound(_))));

        let mismatched = context.get_bean_typed::<String>("answer").await;
        assert!(matches!(mismatched, Err(ContainerError::TypeMismatch { .. })));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let context = ApplicationContext::new();
        context.register_instance("answer", 42u32).unwrap();

        let result = context.register_instance("answer", 43u32);
        assert!(matches!(result, Err(ContainerError::DuplicateBean(_))));
        assert_eq!(context.get_bean_names(), vec!["answer".to_string()]);
    }
}
