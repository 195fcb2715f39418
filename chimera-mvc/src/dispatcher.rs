//! 请求分发
//!
//! 每个控制器节点持有一个分发器，按顺序执行：
//!
//! 1. OPTIONS 请求不进入普通分发（应由 CORS 阶段处理）- 400
//! 2. 路由匹配，没有匹配 - 404
//! 3. 从容器获取控制器实例（每个请求获取一次，不缓存）
//! 4. 处理方法声明了授权要求且存在授权能力时先做授权检查 - 401
//! 5. 参数绑定并调用处理方法
//! 6. 序列化返回值
//!
//! 任何错误都在分发器内部转换为响应，不会继续向外传播。

use std::sync::Arc;

use async_trait::async_trait;

use crate::binder::ParameterBinder;
use crate::container::HandlerContainer;
use crate::context::RequestContext;
use crate::error::{WebError, WebResult};
use crate::matcher::match_route;
use crate::metadata::{ControllerMetadata, RouteMethod};
use crate::middleware::{Middleware, Next};
use crate::reply::write_reply;

/// 授权能力
#[async_trait]
pub trait Authorization: Send + Sync {
    /// 当前请求是否已授权
    async fn is_auth(&self, ctx: &RequestContext) -> anyhow::Result<bool>;
}

/// 控制器分发器
pub struct Dispatcher {
    container: Arc<dyn HandlerContainer>,
    controller: Arc<ControllerMetadata>,
    authorization: Option<Arc<dyn Authorization>>,
}

impl Dispatcher {
    pub fn new(container: Arc<dyn HandlerContainer>, controller: Arc<ControllerMetadata>) -> Self {
        Self {
            container,
            controller,
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, authorization: Option<Arc<dyn Authorization>>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn controller(&self) -> &Arc<ControllerMetadata> {
        &self.controller
    }

    /// 分发请求，结果（包括错误）写入上下文
    pub async fn dispatch(&self, ctx: &mut RequestContext) {
        if let Err(error) = self.try_dispatch(ctx).await {
            if error.is_recognized() {
                tracing::debug!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    status = %error.status_code().as_u16(),
                    error = %error,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    controller = %self.controller.token(),
                    method = %ctx.method(),
                    path = %ctx.path(),
                    error = ?error,
                    "Unhandled error while dispatching request"
                );
            }
            ctx.fail(&error);
        }
    }

    async fn try_dispatch(&self, ctx: &mut RequestContext) -> WebResult<()> {
        let method = RouteMethod::from(ctx.method());
        if method == RouteMethod::Options {
            return Err(WebError::bad_request(
                "OPTIONS requests are handled by the CORS preflight stage",
            ));
        }

        let controller = &self.controller;
        let route = match_route(ctx.path(), method, controller).ok_or_else(WebError::not_found)?;
        let token = controller.token();
        let handler = route.property_key.as_str();

        let instance = self.container.get(token).await?;

        if let Some(authorization) = &self.authorization {
            if controller.requires_auth(handler) && !authorization.is_auth(ctx).await? {
                return Err(WebError::unauthorized());
            }
        }

        let params = self.container.method_parameters(token, handler);
        let args = ParameterBinder::new(self.container.as_ref())
            .bind(controller.mount(), route, &params, ctx)
            .await?;

        tracing::debug!(
            controller = %token,
            handler,
            args = args.len(),
            "Invoking handler"
        );

        let reply = self
            .container
            .invoke(token, handler, instance, args)
            .await?;

        write_reply(reply, route, ctx, self.container.as_ref()).await
    }
}

/// 分发器是控制器节点的最后一个阶段，不会调用 next
#[async_trait]
impl Middleware for Dispatcher {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> WebResult<()> {
        self.dispatch(ctx).await;
        Ok(())
    }
}
