//! 框架配置常量定义
//!
//! 定义分发核心使用的配置键名称和默认值

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 请求体大小上限（字节）
pub const SERVER_BODY_LIMIT: &str = "server.body-limit";

/// 是否启用请求日志
pub const SERVER_ENABLE_REQUEST_LOGGING: &str = "server.enable-request-logging";

/// 是否为每个请求生成 X-Request-ID
pub const SERVER_ENABLE_REQUEST_ID: &str = "server.enable-request-id";

/// 默认请求体大小上限：2 MiB
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

// ==================== CORS 配置 ====================

/// 固定的 Access-Control-Allow-Origin，未配置时回显请求的 Origin
pub const CORS_ORIGIN: &str = "cors.origin";

pub const CORS_CREDENTIALS: &str = "cors.credentials";

pub const CORS_EXPOSE_HEADERS: &str = "cors.expose-headers";

/// 下游出错时是否保留已写入的 CORS 响应头
pub const CORS_KEEP_HEADERS_ON_ERROR: &str = "cors.keep-headers-on-error";

pub const CORS_ALLOW_METHODS: &str = "cors.allow-methods";

pub const CORS_ALLOW_HEADERS: &str = "cors.allow-headers";

/// 预检结果缓存时间（秒）
pub const CORS_MAX_AGE: &str = "cors.max-age";

/// 未配置 allowMethods 时预检返回的方法列表
pub const DEFAULT_ALLOW_METHODS: &str = "GET,HEAD,PUT,POST,DELETE,PATCH";

// ==================== Tera 模板引擎配置 ====================

/// 是否启用 Tera 模板引擎
pub const TERA_ENABLED: &str = "chimera.tera.enabled";

/// Tera 模板模式
pub const TERA_PATTERN: &str = "chimera.tera.pattern";

/// 模板引擎在容器中的名称
pub const TEMPLATE_ENGINE_BEAN: &str = "templateEngine";
