//! Web 应用装配
//!
//! 把控制器元数据、处理方法、授权能力、CORS 配置和额外的中间件组装成可运行的应用：
//!
//! ```ignore
//! let app = WebApplication::builder(context)
//!     .controller(
//!         ControllerMetadata::new("userController", "/users")
//!             .get("/:id", "find")
//!             .require_auth("find"),
//!     )
//!     .handler("userController", "find", vec![ParamType::Number], UserController::find)
//!     .authorization(Arc::new(TokenAuthorization))
//!     .build()
//!     .await?;
//!
//! app.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use chimera_core::{ApplicationContext, ApplicationError, ApplicationResult, Container};

use crate::binder::{Args, ParamType};
use crate::constants::TEMPLATE_ENGINE_BEAN;
use crate::container::{HandlerContainer, HandlerRegistry, WebContainer};
use crate::cors::CorsOptions;
use crate::dispatcher::Authorization;
use crate::metadata::{ControllerMetadata, MetadataRegistry};
use crate::middleware::{
    MiddlewareChainBuilder, OrderedMiddleware, Pipeline, RequestId, RequestLogging,
};
use crate::reply::Reply;
use crate::route::{RootRoute, RouteNode};
use crate::server::{pipeline_router, ChimeraWebServer, ServerProperties};
use crate::template::{TemplateEngine, TemplateProperties};

/// 授权能力在容器中的名称，类型为 `Arc<dyn Authorization>`
pub const AUTHORIZATION_BEAN: &str = "authorization";

/// 内置中间件名称
pub const REQUEST_LOGGING: &str = "requestLogging";
pub const REQUEST_ID: &str = "requestId";
pub const ROUTER: &str = "router";

/// Web 应用构建器
pub struct WebApplicationBuilder {
    context: Arc<ApplicationContext>,
    controllers: Vec<ControllerMetadata>,
    handlers: HandlerRegistry,
    authorization: Option<Arc<dyn Authorization>>,
    middlewares: Vec<OrderedMiddleware>,
    cors: Option<CorsOptions>,
    properties: Option<ServerProperties>,
}

impl WebApplicationBuilder {
    pub fn new(context: Arc<ApplicationContext>) -> Self {
        Self {
            context,
            controllers: Vec::new(),
            handlers: HandlerRegistry::new(),
            authorization: None,
            middlewares: Vec::new(),
            cors: None,
            properties: None,
        }
    }

    /// 注册控制器元数据
    pub fn controller(mut self, metadata: ControllerMetadata) -> Self {
        self.controllers.push(metadata);
        self
    }

    /// 注册处理方法
    pub fn handler<C, F, Fut, R>(
        mut self,
        controller: &str,
        method: &str,
        params: Vec<ParamType>,
        handler: F,
    ) -> Self
    where
        C: std::any::Any + Send + Sync,
        F: Fn(Arc<C>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        self.handlers.register(controller, method, params, handler);
        self
    }

    /// 设置授权能力，未设置时从容器中查找 `authorization`
    pub fn authorization(mut self, authorization: Arc<dyn Authorization>) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// 添加中间件
    pub fn middleware(mut self, middleware: OrderedMiddleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// 设置全局 CORS 配置，未设置时从 Environment 读取
    pub fn cors(mut self, options: CorsOptions) -> Self {
        self.cors = Some(options);
        self
    }

    /// 设置服务器配置，未设置时从 Environment 读取
    pub fn properties(mut self, properties: ServerProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    async fn resolve_authorization(&self) -> ApplicationResult<Option<Arc<dyn Authorization>>> {
        if let Some(authorization) = &self.authorization {
            return Ok(Some(Arc::clone(authorization)));
        }
        if !self.context.contains_bean(AUTHORIZATION_BEAN) {
            return Ok(None);
        }

        let bean = self
            .context
            .get_bean_typed::<Arc<dyn Authorization>>(AUTHORIZATION_BEAN)
            .await?;
        Ok(Some(Arc::clone(&*bean)))
    }

    fn register_template_engine(&self) -> ApplicationResult<()> {
        let props = TemplateProperties::from_environment(self.context.environment());
        if !props.enabled || self.context.contains_bean(TEMPLATE_ENGINE_BEAN) {
            return Ok(());
        }

        let engine = TemplateEngine::new(&props.pattern)
            .map_err(|e| ApplicationError::Config(e.to_string()))?;
        self.context.register_instance(TEMPLATE_ENGINE_BEAN, engine)?;
        Ok(())
    }

    /// 组装应用
    pub async fn build(self) -> ApplicationResult<WebApplication> {
        let environment = self.context.environment();
        let properties = self
            .properties
            .clone()
            .unwrap_or_else(|| ServerProperties::from_environment(environment));
        let cors = Arc::new(
            self.cors
                .clone()
                .unwrap_or_else(|| CorsOptions::from_environment(environment)),
        );

        self.register_template_engine()?;
        let authorization = self.resolve_authorization().await?;

        let Self {
            context,
            controllers,
            handlers,
            middlewares,
            ..
        } = self;

        for metadata in &controllers {
            for key in metadata.property_keys() {
                if !handlers.contains(metadata.token(), key) {
                    tracing::warn!(
                        controller = %metadata.token(),
                        handler = key,
                        "Route declared without a registered handler"
                    );
                }
            }
        }

        let container: Arc<dyn HandlerContainer> =
            Arc::new(WebContainer::new(Arc::clone(&context), handlers));

        let mut registry = MetadataRegistry::new();
        let mut controller_order = Vec::with_capacity(controllers.len());
        for metadata in controllers {
            if !container.has(metadata.token()) {
                return Err(ApplicationError::Config(format!(
                    "controller '{}' is not registered in the application context",
                    metadata.token()
                )));
            }
            let token = metadata.token().to_string();
            registry.register(metadata);
            if !controller_order.contains(&token) {
                controller_order.push(token);
            }
        }

        let mut root = RootRoute::new();
        for token in &controller_order {
            if let Some(metadata) = registry.get(token) {
                root.add(RouteNode::new(
                    Arc::clone(metadata),
                    Arc::clone(&container),
                    authorization.clone(),
                    Arc::clone(&cors),
                ));
            }
        }

        let mut chain = MiddlewareChainBuilder::new();
        if properties.enable_request_logging {
            chain.insert(OrderedMiddleware::new(REQUEST_LOGGING, RequestLogging));
        }
        if properties.enable_request_id {
            chain.insert(OrderedMiddleware::new(REQUEST_ID, RequestId));
        }
        chain.insert(OrderedMiddleware::new(ROUTER, root));
        for middleware in middlewares {
            chain.insert(middleware);
        }

        let pipeline = chain.build(&context).await?;

        tracing::info!(
            controllers = registry.len(),
            middlewares = ?pipeline.names(),
            authorization = authorization.is_some(),
            "Web application assembled"
        );

        Ok(WebApplication {
            properties: Arc::new(properties),
            registry: Arc::new(registry),
            pipeline,
        })
    }
}

/// 组装完成的 Web 应用
pub struct WebApplication {
    properties: Arc<ServerProperties>,
    registry: Arc<MetadataRegistry>,
    pipeline: Pipeline,
}

impl WebApplication {
    pub fn builder(context: Arc<ApplicationContext>) -> WebApplicationBuilder {
        WebApplicationBuilder::new(context)
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// 生成 axum Router
    pub fn router(&self) -> Router {
        pipeline_router(self.pipeline.clone(), self.properties.body_limit)
    }

    /// 启动服务器
    pub async fn run(self) -> ApplicationResult<()> {
        let router = self.router();
        ChimeraWebServer::new(self.properties, router).run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::error::WebResult;
    use crate::middleware::{Middleware, Next};
    use async_trait::async_trait;
    use chimera_core::{Environment, MapPropertySource};

    struct Home;

    struct Noop;

    #[async_trait]
    impl Middleware for Noop {
        async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
            next.run(ctx).await
        }
    }

    fn context() -> Arc<ApplicationContext> {
        let context = ApplicationContext::new();
        context.register_instance("home", Home).unwrap();
        Arc::new(context)
    }

    fn home() -> ControllerMetadata {
        ControllerMetadata::new("home", "/").get("", "index")
    }

    #[tokio::test]
    async fn test_default_chain() {
        let app = WebApplication::builder(context())
            .controller(home())
            .handler("home", "index", vec![], |_: Arc<Home>, _: Args| async {
                Ok::<_, anyhow::Error>("home")
            })
            .middleware(OrderedMiddleware::new("auth", Noop).before(ROUTER))
            .build()
            .await
            .unwrap();

        assert_eq!(
            app.pipeline().names(),
            &["requestLogging", "requestId", "auth", "router"]
        );
        assert_eq!(app.metadata().len(), 1);
    }

    #[tokio::test]
    async fn test_builtins_follow_configuration() {
        let environment = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property("server.enable-request-logging", false)
                .with_property("server.enable-request-id", false),
        );
        let context = ApplicationContext::with_environment(Arc::new(environment));
        context.register_instance("home", Home).unwrap();

        let app = WebApplication::builder(Arc::new(context))
            .controller(home())
            .build()
            .await
            .unwrap();

        assert_eq!(app.pipeline().names(), &["router"]);
    }

    #[tokio::test]
    async fn test_unknown_controller_fails() {
        let result = WebApplication::builder(Arc::new(ApplicationContext::new()))
            .controller(home())
            .build()
            .await;

        assert!(matches!(result, Err(ApplicationError::Config(_))));
    }

    #[tokio::test]
    async fn test_authorization_bean_is_picked_up() {
        struct Always;

        #[async_trait]
        impl Authorization for Always {
            async fn is_auth(&self, _ctx: &RequestContext) -> anyhow::Result<bool> {
                Ok(true)
            }
        }

        let context = context();
        let authorization: Arc<dyn Authorization> = Arc::new(Always);
        context.register_instance(AUTHORIZATION_BEAN, authorization).unwrap();

        let builder = WebApplication::builder(context).controller(home());
        assert!(builder.resolve_authorization().await.unwrap().is_some());
    }
}
