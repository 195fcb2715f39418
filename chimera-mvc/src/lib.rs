//! # Chimera MVC
//!
//! 服务端 MVC 层的请求分发核心，基于 Axum 构建
//!
//! ## 核心特性
//!
//! - **路由匹配** - 精确匹配优先，其次是最长静态前缀的 REST 参数模式
//! - **CORS 预检** - 按预检请求声明的方法匹配目标处理方法，合并方法级 / 控制器级 / 全局配置
//! - **参数绑定** - REST 参数转换为字符串、布尔、数字、日期；模型参数从请求体绑定
//! - **授权检查** - 在参数绑定和处理方法调用之前完成
//! - **结果序列化** - 文本、二进制、JSON 对象，以及 JSON / 视图 / 文件 / 重定向结果
//! - **中间件链** - 按名称和 before / after 约束组装的 Koa 风格管道

pub mod app;
pub mod binder;
pub mod constants;
pub mod container;
pub mod context;
pub mod cors;
pub mod dispatcher;
pub mod error;
pub mod matcher;
pub mod metadata;
pub mod middleware;
pub mod reply;
pub mod route;
pub mod server;
pub mod template;

pub use app::{WebApplication, WebApplicationBuilder};
pub use binder::{Arg, Args, ParamType, ParameterBinder, RequestModel};
pub use container::{HandlerContainer, HandlerRegistry, WebContainer};
pub use context::{RequestContext, ResponseBody};
pub use cors::{CorsMiddleware, CorsOptions};
pub use dispatcher::{Authorization, Dispatcher};
pub use error::{WebError, WebResult};
pub use matcher::match_route;
pub use metadata::{ControllerMetadata, CorsMetadata, MetadataRegistry, RouteMetadata, RouteMethod};
pub use middleware::{
    Middleware, MiddlewareChainBuilder, MiddlewareToken, Next, OrderedMiddleware, Pipeline,
    RequestId, RequestLogging,
};
pub use reply::{ActionResult, Reply};
pub use route::{RootRoute, RouteNode};
pub use server::{ChimeraWebServer, ServerProperties};
pub use template::{TemplateEngine, TemplateProperties};

// 导出 async_trait，实现 Middleware / Authorization 时无需单独依赖
pub use async_trait;

pub mod prelude {
    //! 预导入模块

    pub use crate::app::*;
    pub use crate::binder::{Arg, Args, ParamType, RequestModel};
    pub use crate::context::{RequestContext, ResponseBody};
    pub use crate::cors::CorsOptions;
    pub use crate::dispatcher::Authorization;
    pub use crate::error::{WebError, WebResult};
    pub use crate::metadata::{ControllerMetadata, CorsMetadata, RouteMetadata, RouteMethod};
    pub use crate::middleware::{Middleware, Next, OrderedMiddleware};
    pub use crate::reply::{ActionResult, Reply};
    pub use crate::server::ServerProperties;
    pub use crate::template::TemplateEngine;

    pub use async_trait::async_trait;
    pub use axum;
    pub use axum::http::StatusCode;
}
