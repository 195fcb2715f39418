//! Web 服务器模块
//!
//! 基于 Axum 的 Web 服务器实现：所有请求进入同一个 fallback 处理器，
//! 构建请求上下文后交给组装好的中间件管道，最后把上下文（或逃逸出管道的错误）转换为响应。
//!
//! 请求体超过 `server.body-limit` 时返回 413，读取失败（连接中断等）返回 400。

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::{Bytes, BytesMut};
use chimera_core::prelude::*;
use futures_util::StreamExt;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::constants::*;
use crate::context::RequestContext;
use crate::error::WebError;
use crate::middleware::Pipeline;

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 请求体大小上限（字节）
    pub body_limit: usize,

    /// 是否启用请求日志
    pub enable_request_logging: bool,

    /// 是否启用 X-Request-ID
    pub enable_request_id: bool,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit: DEFAULT_BODY_LIMIT,
            enable_request_logging: true,
            enable_request_id: true,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
            body_limit: env
                .get_i64(SERVER_BODY_LIMIT)
                .and_then(|limit| usize::try_from(limit).ok())
                .unwrap_or(defaults.body_limit),
            enable_request_logging: env
                .get_bool_or(SERVER_ENABLE_REQUEST_LOGGING, defaults.enable_request_logging),
            enable_request_id: env.get_bool_or(SERVER_ENABLE_REQUEST_ID, defaults.enable_request_id),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    pipeline: Pipeline,
    body_limit: usize,
}

/// 把管道包装为 axum Router
pub fn pipeline_router(pipeline: Pipeline, body_limit: usize) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(ServerState {
            pipeline,
            body_limit,
        })
}

/// 读取请求体时的失败
enum BodyError {
    TooLarge,
    Read(axum::Error),
}

/// 按块读取请求体，累计超过上限时立即停止
async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match read_body(body, state.body_limit).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => {
            tracing::debug!(limit = state.body_limit, "Request body exceeds the limit");
            return WebError::status(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
                .into_response();
        }
        Err(BodyError::Read(e)) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return WebError::bad_request("Failed to read request body").into_response();
        }
    };

    let mut ctx = RequestContext::from_parts(parts, body);

    match state.pipeline.run(&mut ctx).await {
        Ok(()) => ctx.into_response(),
        Err(error) => {
            if !error.is_recognized() {
                tracing::error!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    error = ?error,
                    "Unhandled error escaped the middleware pipeline"
                );
            }
            error.into_response()
        }
    }
}

///  Chimera Web 服务器
pub struct ChimeraWebServer {
    /// 服务器配置
    config: Arc<ServerProperties>,

    /// 路由（无状态）
    router: Router,
}

impl ChimeraWebServer {
    /// 创建新的 Web 服务器
    pub fn new(config: Arc<ServerProperties>, router: Router) -> Self {
        Self { config, router }
    }

    /// 启动服务器
    pub async fn run(self) -> ApplicationResult<()> {
        let addr = self.config.address();
        let app = self.router.into_make_service();

        tracing::info!("🚀 Starting Chimera Web Server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApplicationError::Other(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("✅ Server listening on http://{}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| ApplicationError::Other(format!("Server error: {}", e)))?;

        Ok(())
    }
}
