//! 模板引擎支持
//!
//! 基于 Tera 模板引擎渲染视图结果（`ActionResult::View`）。
//! 引擎以 `templateEngine` 为名注册到容器中，分发器在序列化视图结果时按名称获取。
//!
//! ## 使用示例
//!
//! ```ignore
//! let engine = TemplateEngine::from_environment(context.environment())?;
//! context.register_instance(TEMPLATE_ENGINE_BEAN, engine)?;
//!
//! // 处理方法中
//! Ok(ActionResult::view("user/detail.html", json!({ "user": user })))
//! ```

use std::sync::{Arc, RwLock};

use chimera_core::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tera::Tera;

use crate::constants::*;

/// Tera 模板引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProperties {
    /// 是否启用 Tera 模板引擎
    pub enabled: bool,

    /// Tera 模板模式（默认 "templates/**/*"）
    pub pattern: String,
}

impl Default for TemplateProperties {
    fn default() -> Self {
        Self {
            enabled: false,
            pattern: "templates/**/*".to_string(),
        }
    }
}

impl TemplateProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            enabled: env.get_bool_or(TERA_ENABLED, defaults.enabled),
            pattern: env.get_string_or(TERA_PATTERN, &defaults.pattern),
        }
    }
}

/// 模板错误类型
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to acquire template engine lock")]
    EngineLockError,

    #[error("Failed to render template '{template}': {cause}")]
    RenderError { template: String, cause: String },

    #[error("Template initialization error: {0}")]
    InitError(String),
}

/// 模板引擎 - 可注入的 Bean
#[derive(Clone)]
pub struct TemplateEngine {
    tera: Arc<RwLock<Tera>>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// 创建新的模板引擎实例
    ///
    /// # 参数
    ///
    /// * `pattern` - glob 模式，例如 "templates/**/*.html"
    pub fn new(pattern: &str) -> Result<Self, TemplateError> {
        let tera = Tera::new(pattern).map_err(|e| {
            TemplateError::InitError(format!(
                "Failed to initialize Tera with pattern '{}': {}",
                pattern, e
            ))
        })?;

        tracing::info!(pattern = %pattern, templates = tera.get_template_names().count(), "Template engine created");

        Ok(Self {
            tera: Arc::new(RwLock::new(tera)),
        })
    }

    /// 不读取文件系统的空引擎，模板通过 `add_template` 添加
    pub fn empty() -> Self {
        Self {
            tera: Arc::new(RwLock::new(Tera::default())),
        }
    }

    /// 从 Environment 创建模板引擎
    pub fn from_environment(env: &Environment) -> Result<Self, TemplateError> {
        let props = TemplateProperties::from_environment(env);

        if !props.enabled {
            return Err(TemplateError::InitError(
                "Template engine is disabled in configuration".to_string(),
            ));
        }

        Self::new(&props.pattern)
    }

    /// 添加内联模板
    pub fn add_template(&self, name: &str, content: &str) -> Result<(), TemplateError> {
        self.tera
            .write()
            .map_err(|_| TemplateError::EngineLockError)?
            .add_raw_template(name, content)
            .map_err(|e| TemplateError::InitError(e.to_string()))
    }

    /// 渲染模板
    ///
    /// 对象模型的字段直接作为模板变量，其他值以 `model` 变量暴露
    pub fn render(&self, template_name: &str, model: &Value) -> Result<String, TemplateError> {
        let context = match model {
            Value::Object(_) => tera::Context::from_value(model.clone()).map_err(|e| {
                TemplateError::RenderError {
                    template: template_name.to_string(),
                    cause: e.to_string(),
                }
            })?,
            other => {
                let mut context = tera::Context::new();
                context.insert("model", other);
                context
            }
        };

        self.tera
            .read()
            .map_err(|_| TemplateError::EngineLockError)?
            .render(template_name, &context)
            .map_err(|e| TemplateError::RenderError {
                template: template_name.to_string(),
                cause: e.to_string(),
            })
    }

    pub fn has_template(&self, template_name: &str) -> bool {
        self.tera
            .read()
            .map(|tera| tera.get_template_names().any(|name| name == template_name))
            .unwrap_or(false)
    }
}
