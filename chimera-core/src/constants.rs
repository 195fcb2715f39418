//! 核心配置键

/// 日志级别
pub const LOGGING_LEVEL: &str = "logging.level";

/// 日志格式（compact / full / json / pretty）
pub const LOGGING_FORMAT: &str = "logging.format";

/// 自定义过滤器，例如 "chimera_mvc=debug,tower=warn"
pub const LOGGING_FILTER: &str = "logging.filter";

/// 是否输出模块路径
pub const LOGGING_SHOW_TARGET: &str = "logging.show-target";
