//! 核心错误类型
//!
//! 容器与应用启动阶段的错误，使用 thiserror 定义，业务代码可通过 `?` 转换为 anyhow::Error

use thiserror::Error;

/// 容器错误
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Bean not found: {0}")]
    BeanNotFound(String),

    #[error("Bean creation failed: {0}")]
    BeanCreationFailed(String),

    #[error("Bean '{name}' is not of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Bean already registered: {0}")]
    DuplicateBean(String),
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 应用级错误
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("{0}")]
    Other(String),
}

pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;

/// 框架统一的 anyhow 结果类型（业务代码使用）
pub use anyhow::Result;
