//! 跨域资源共享
//!
//! 全局 CORS 配置在启动时从 Environment 读取，之后只读；
//! 方法级 / 控制器级的 [`CorsMetadata`] 与全局配置合并时生成新的值。
//!
//! 每个控制器节点在分发之前运行一个 [`CorsMiddleware`]：
//!
//! - 始终追加 `Vary: Origin`
//! - 没有 `Origin` 请求头时直接进入下一阶段
//! - 普通跨域请求：写入 `Allow-Origin`，按配置写入 `Allow-Credentials` 和 `Expose-Headers`
//! - 预检请求：按 `Access-Control-Request-Method` 匹配目标处理方法，
//!   找到 CORS 配置时以 204 结束管道，否则原样进入下一阶段

use std::sync::Arc;

use async_trait::async_trait;
use chimera_core::Environment;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::constants::*;
use crate::context::{RequestContext, ResponseBody};
use crate::error::{WebError, WebResult};
use crate::matcher::match_route;
use crate::metadata::{ControllerMetadata, CorsMetadata, RouteMethod};
use crate::middleware::{Middleware, Next};

/// 全局 CORS 配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsOptions {
    /// 固定的 Allow-Origin，未设置时回显请求的 Origin
    pub origin: Option<String>,
    pub credentials: bool,
    pub expose_headers: Option<String>,
    pub keep_headers_on_error: bool,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub max_age: Option<u64>,
}

impl CorsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            origin: env.get_string(CORS_ORIGIN),
            credentials: env.get_bool_or(CORS_CREDENTIALS, false),
            expose_headers: env.get_string(CORS_EXPOSE_HEADERS),
            keep_headers_on_error: env.get_bool_or(CORS_KEEP_HEADERS_ON_ERROR, false),
            allow_methods: env.get_string_array(CORS_ALLOW_METHODS),
            allow_headers: env.get_string_array(CORS_ALLOW_HEADERS),
            max_age: env
                .get_i64(CORS_MAX_AGE)
                .and_then(|age| u64::try_from(age).ok()),
        }
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn expose_headers(mut self, headers: impl Into<String>) -> Self {
        self.expose_headers = Some(headers.into());
        self
    }

    pub fn keep_headers_on_error(mut self, keep: bool) -> Self {
        self.keep_headers_on_error = keep;
        self
    }

    /// 用处理方法的 CORS 元数据覆盖全局配置，返回新的配置
    pub fn merge(&self, metadata: &CorsMetadata) -> CorsOptions {
        CorsOptions {
            origin: self.origin.clone(),
            credentials: metadata.credentials.unwrap_or(self.credentials),
            expose_headers: metadata
                .expose_headers
                .clone()
                .or_else(|| self.expose_headers.clone()),
            keep_headers_on_error: metadata
                .keep_headers_on_error
                .unwrap_or(self.keep_headers_on_error),
            allow_methods: metadata
                .allow_methods
                .clone()
                .or_else(|| self.allow_methods.clone()),
            allow_headers: metadata
                .allow_headers
                .clone()
                .or_else(|| self.allow_headers.clone()),
            max_age: metadata.max_age.or(self.max_age),
        }
    }

    fn allow_origin<'a>(&'a self, request_origin: &'a str) -> &'a str {
        self.origin.as_deref().unwrap_or(request_origin)
    }
}

fn header_value(name: &HeaderName, value: &str) -> WebResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        WebError::Internal(anyhow::anyhow!("invalid value for header {}: {}", name, e))
    })
}

/// 控制器节点上的 CORS 阶段
pub struct CorsMiddleware {
    options: Arc<CorsOptions>,
    controller: Arc<ControllerMetadata>,
}

impl CorsMiddleware {
    pub fn new(options: Arc<CorsOptions>, controller: Arc<ControllerMetadata>) -> Self {
        Self {
            options,
            controller,
        }
    }

    /// 非预检的跨域请求
    async fn actual(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
        request_origin: &str,
    ) -> WebResult<()> {
        let options = &self.options;
        let mut emitted = HeaderMap::new();

        emitted.insert(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            header_value(&ACCESS_CONTROL_ALLOW_ORIGIN, options.allow_origin(request_origin))?,
        );
        if options.credentials {
            emitted.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(expose) = options.expose_headers.as_deref() {
            emitted.insert(
                ACCESS_CONTROL_EXPOSE_HEADERS,
                header_value(&ACCESS_CONTROL_EXPOSE_HEADERS, expose)?,
            );
        }

        for (name, value) in &emitted {
            ctx.set_header(name.clone(), value.clone());
        }

        if !options.keep_headers_on_error {
            return next.run(ctx).await;
        }

        next.run(ctx)
            .await
            .map_err(|error| error.with_headers(emitted))
    }

    /// 预检请求
    async fn preflight(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
        request_origin: &str,
    ) -> WebResult<()> {
        let Some(requested) = ctx
            .header(ACCESS_CONTROL_REQUEST_METHOD.as_str())
            .map(str::to_string)
        else {
            // 不是真正的预检请求
            return next.run(ctx).await;
        };

        let target = RouteMethod::parse(Some(requested.as_str()));
        let cors = match_route(ctx.path(), target, &self.controller)
            .and_then(|route| self.controller.cors_for(&route.property_key));

        let Some(cors) = cors else {
            tracing::debug!(
                path = %ctx.path(),
                method = %requested,
                "Preflight target has no CORS configuration"
            );
            return next.run(ctx).await;
        };

        let options = self.options.merge(cors);

        ctx.try_set_header(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            options.allow_origin(request_origin),
        )?;
        if options.credentials {
            ctx.set_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(max_age) = options.max_age {
            ctx.set_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
        }

        match &options.allow_methods {
            Some(methods) => ctx.try_set_header(ACCESS_CONTROL_ALLOW_METHODS, &methods.join(","))?,
            None => ctx.set_header(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(DEFAULT_ALLOW_METHODS),
            ),
        }

        match &options.allow_headers {
            Some(headers) => ctx.try_set_header(ACCESS_CONTROL_ALLOW_HEADERS, &headers.join(","))?,
            None => {
                if let Some(requested_headers) = ctx
                    .header_value(ACCESS_CONTROL_REQUEST_HEADERS.as_str())
                    .cloned()
                {
                    ctx.set_header(ACCESS_CONTROL_ALLOW_HEADERS, requested_headers);
                }
            }
        }

        ctx.set_status(StatusCode::NO_CONTENT);
        ctx.set_body(ResponseBody::Empty);
        Ok(())
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        ctx.vary("Origin");

        let Some(request_origin) = ctx.header(ORIGIN.as_str()).map(str::to_string) else {
            return next.run(ctx).await;
        };

        if *ctx.method() == Method::OPTIONS {
            self.preflight(ctx, next, &request_origin).await
        } else {
            self.actual(ctx, next, &request_origin).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Pipeline;
    use chimera_core::MapPropertySource;
    use http::Uri;

    /// 记录管道是否继续
    struct Reached;

    #[async_trait]
    impl Middleware for Reached {
        async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> WebResult<()> {
            ctx.set_body(ResponseBody::Text("reached".to_string()));
            Ok(())
        }
    }

    struct Fails;

    #[async_trait]
    impl Middleware for Fails {
        async fn handle(&self, _ctx: &mut RequestContext, _next: Next<'_>) -> WebResult<()> {
            Err(WebError::bad_request("boom"))
        }
    }

    fn items() -> ControllerMetadata {
        ControllerMetadata::new("itemController", "/items")
            .get("", "list")
            .post("", "create")
            .delete("/:id", "remove")
            .cors("create", CorsMetadata::new().allow_headers(["X-Foo"]))
    }

    fn pipeline(
        options: CorsOptions,
        controller: ControllerMetadata,
        tail: impl Middleware + 'static,
    ) -> Pipeline {
        let cors = CorsMiddleware::new(Arc::new(options), Arc::new(controller));
        Pipeline::new(vec![
            ("cors".to_string(), Arc::new(cors) as Arc<dyn Middleware>),
            ("tail".to_string(), Arc::new(tail) as Arc<dyn Middleware>),
        ])
    }

    fn preflight(path: &str) -> RequestContext {
        RequestContext::new(Method::OPTIONS, path.parse::<Uri>().unwrap())
            .with_header(ORIGIN, "https://a.com")
    }

    fn reached(ctx: &RequestContext) -> bool {
        ctx.body() == &ResponseBody::Text("reached".to_string())
    }

    #[test]
    fn test_options_from_environment() {
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(CORS_ORIGIN, "https://app.example.com")
                .with_property(CORS_CREDENTIALS, true)
                .with_property(CORS_ALLOW_HEADERS, "X-Foo, X-Bar")
                .with_property(CORS_MAX_AGE, 600i64),
        );

        let options = CorsOptions::from_environment(&env);
        assert_eq!(options.origin.as_deref(), Some("https://app.example.com"));
        assert!(options.credentials);
        assert!(!options.keep_headers_on_error);
        assert_eq!(
            options.allow_headers,
            Some(vec!["X-Foo".to_string(), "X-Bar".to_string()])
        );
        assert_eq!(options.max_age, Some(600));
    }

    #[test]
    fn test_merge_does_not_touch_global() {
        let global = CorsOptions::new().credentials(false).expose_headers("X-Total");
        let merged = global.merge(&CorsMetadata::new().credentials(true).max_age(60));

        assert!(merged.credentials);
        assert_eq!(merged.max_age, Some(60));
        assert_eq!(merged.expose_headers.as_deref(), Some("X-Total"));
        assert!(!global.credentials);
        assert_eq!(global.max_age, None);
    }

    #[tokio::test]
    async fn test_preflight_with_allow_headers() {
        let pipeline = pipeline(CorsOptions::new(), items(), Reached);
        let mut ctx = preflight("/items").with_header(ACCESS_CONTROL_REQUEST_METHOD, "POST");

        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::NO_CONTENT));
        assert!(ctx.body().is_empty());
        assert!(!reached(&ctx));
        assert_eq!(ctx.response_header("access-control-allow-headers"), Some("X-Foo"));
        assert_eq!(
            ctx.response_header("access-control-allow-origin"),
            Some("https://a.com")
        );
        assert_eq!(ctx.response_header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn test_preflight_default_allow_methods() {
        let pipeline = pipeline(CorsOptions::new(), items(), Reached);
        let mut ctx = preflight("/items").with_header(ACCESS_CONTROL_REQUEST_METHOD, "POST");

        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.response_header("access-control-allow-methods"),
            Some("GET,HEAD,PUT,POST,DELETE,PATCH")
        );
        assert_eq!(ctx.response_header("access-control-max-age"), None);
        assert_eq!(ctx.response_header("access-control-allow-credentials"), None);
    }

    #[tokio::test]
    async fn test_preflight_echoes_request_headers() {
        let controller = ControllerMetadata::new("itemController", "/items")
            .delete("/:id", "remove")
            .controller_cors(
                CorsMetadata::new()
                    .allow_methods(["DELETE"])
                    .credentials(true)
                    .max_age(3600),
            );
        let pipeline = pipeline(CorsOptions::new().origin("https://fixed.com"), controller, Reached);
        let mut ctx = preflight("/items/7")
            .with_header(ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
            .with_header(ACCESS_CONTROL_REQUEST_HEADERS, "X-Token, Content-Type");

        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::NO_CONTENT));
        assert_eq!(
            ctx.response_header("access-control-allow-headers"),
            Some("X-Token, Content-Type")
        );
        assert_eq!(ctx.response_header("access-control-allow-methods"), Some("DELETE"));
        assert_eq!(ctx.response_header("access-control-allow-credentials"), Some("true"));
        assert_eq!(ctx.response_header("access-control-max-age"), Some("3600"));
        assert_eq!(
            ctx.response_header("access-control-allow-origin"),
            Some("https://fixed.com")
        );
    }

    #[tokio::test]
    async fn test_options_without_request_method_continues() {
        let pipeline = pipeline(CorsOptions::new(), items(), Reached);
        let mut ctx = preflight("/items");

        pipeline.run(&mut ctx).await.unwrap();

        assert!(reached(&ctx));
        assert_eq!(ctx.response_headers().len(), 1);
        assert_eq!(ctx.response_header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn test_preflight_without_cors_metadata_continues() {
        let pipeline = pipeline(CorsOptions::new(), items(), Reached);
        let mut ctx = preflight("/items").with_header(ACCESS_CONTROL_REQUEST_METHOD, "GET");

        pipeline.run(&mut ctx).await.unwrap();

        assert!(reached(&ctx));
        assert_eq!(ctx.response_header("access-control-allow-origin"), None);
    }

    #[tokio::test]
    async fn test_request_without_origin() {
        let pipeline = pipeline(CorsOptions::new(), items(), Reached);
        let mut ctx = RequestContext::new(Method::GET, Uri::from_static("/items"));

        pipeline.run(&mut ctx).await.unwrap();

        assert!(reached(&ctx));
        assert_eq!(ctx.response_header("vary"), Some("Origin"));
        assert_eq!(ctx.response_header("access-control-allow-origin"), None);
    }

    #[tokio::test]
    async fn test_actual_request_headers() {
        let options = CorsOptions::new().credentials(true).expose_headers("X-Total");
        let pipeline = pipeline(options, items(), Reached);
        let mut ctx = RequestContext::new(Method::GET, Uri::from_static("/items"))
            .with_header(ORIGIN, "https://a.com");

        pipeline.run(&mut ctx).await.unwrap();

        assert!(reached(&ctx));
        assert_eq!(
            ctx.response_header("access-control-allow-origin"),
            Some("https://a.com")
        );
        assert_eq!(ctx.response_header("access-control-allow-credentials"), Some("true"));
        assert_eq!(ctx.response_header("access-control-expose-headers"), Some("X-Total"));
    }

    #[tokio::test]
    async fn test_keep_headers_on_error() {
        let options = CorsOptions::new().keep_headers_on_error(true);
        let pipeline = pipeline(options, items(), Fails);
        let mut ctx = RequestContext::new(Method::GET, Uri::from_static("/items"))
            .with_header(ORIGIN, "https://a.com");

        let error = pipeline.run(&mut ctx).await.unwrap_err();

        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        let headers = error.headers().unwrap();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "https://a.com");
    }

    #[tokio::test]
    async fn test_error_without_keep_headers() {
        let pipeline = pipeline(CorsOptions::new(), items(), Fails);
        let mut ctx = RequestContext::new(Method::GET, Uri::from_static("/items"))
            .with_header(ORIGIN, "https://a.com");

        let error = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(error.headers().is_none());
    }
}
