// chimera-core: MVC 分发核心所依赖的外部协作者
//
// - Bean 容器：按名称（token）查找，单例 / 原型作用域，异步工厂
// - 分层配置：TOML 文件、内存、环境变量
// - 日志初始化：基于 tracing-subscriber

pub mod bean;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod logging;

pub use bean::{BeanDefinition, BeanFactory, FunctionFactory, Scope, SharedBean};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use context::{ApplicationContext, Container};
pub use error::{ApplicationError, ApplicationResult, ContainerError, ContainerResult};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

// 导出 async_trait，下游实现 Container 时无需单独依赖
pub use async_trait;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::{BeanDefinition, Scope, SharedBean};
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::context::{ApplicationContext, Container};
    pub use crate::error::{ApplicationError, ApplicationResult, ContainerError, ContainerResult};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use anyhow::{anyhow, Context};
}
