//! 中间件模块
//!
//! 请求管道由一串中间件组成，每个中间件拿到可变的请求上下文和 `Next` 续体：
//! 调用 `next.run(ctx)` 进入后续阶段，不调用则管道在当前阶段结束。
//!
//! 管道在启动时由 [`MiddlewareChainBuilder`] 按名称和相对顺序（before / after）组装，
//! 之后只读。

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chimera_core::{ApplicationContext, ContainerResult};
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue};

use crate::context::RequestContext;
use crate::error::WebResult;

/// 管道中的一个阶段
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()>;
}

/// 剩余的管道阶段
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// 运行下一个阶段，没有剩余阶段时直接返回
    pub async fn run(self, ctx: &mut RequestContext) -> WebResult<()> {
        match self.chain.split_first() {
            Some((current, rest)) => current.handle(ctx, Next { chain: rest }).await,
            None => Ok(()),
        }
    }

    /// 没有后续阶段的续体
    pub fn end() -> Next<'static> {
        Next { chain: &[] }
    }

    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// 组装完成的管道
#[derive(Clone)]
pub struct Pipeline {
    names: Arc<[String]>,
    chain: Arc<[Arc<dyn Middleware>]>,
}

impl Pipeline {
    pub fn new(entries: Vec<(String, Arc<dyn Middleware>)>) -> Self {
        let (names, chain): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        Self {
            names: names.into(),
            chain: chain.into(),
        }
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> WebResult<()> {
        Next { chain: &self.chain }.run(ctx).await
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("names", &self.names).finish()
    }
}

/// 中间件来源：直接给出的实例，或容器中的 Bean 名称
#[derive(Clone)]
pub enum MiddlewareToken {
    Instance(Arc<dyn Middleware>),
    /// 容器中类型为 `Arc<dyn Middleware>` 的 Bean
    Bean(String),
}

impl fmt::Debug for MiddlewareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareToken::Instance(_) => f.write_str("Instance(..)"),
            MiddlewareToken::Bean(name) => f.debug_tuple("Bean").field(name).finish(),
        }
    }
}

/// 带相对顺序约束的中间件声明
#[derive(Debug, Clone)]
pub struct OrderedMiddleware {
    pub name: String,
    pub token: MiddlewareToken,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl OrderedMiddleware {
    pub fn new(name: impl Into<String>, middleware: impl Middleware + 'static) -> Self {
        Self::from_arc(name, Arc::new(middleware))
    }

    pub fn from_arc(name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            name: name.into(),
            token: MiddlewareToken::Instance(middleware),
            before: None,
            after: None,
        }
    }

    /// 从容器中按名称获取的中间件
    pub fn bean(name: impl Into<String>, bean: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: MiddlewareToken::Bean(bean.into()),
            before: None,
            after: None,
        }
    }

    pub fn before(mut self, anchor: impl Into<String>) -> Self {
        self.before = Some(anchor.into());
        self
    }

    pub fn after(mut self, anchor: impl Into<String>) -> Self {
        self.after = Some(anchor.into());
        self
    }
}

/// 中间件链构建器
///
/// 插入是单次线性的：
///
/// - `before` 优先于 `after`，插入到锚点第一次出现的位置之前
/// - `after` 插入到锚点之后
/// - 锚点不存在时追加到末尾并输出警告
/// - 同名条目会先被移除，后插入的生效
///
/// 之后的插入不会回头调整之前已满足的约束，相互冲突的约束不做检测。
#[derive(Debug, Default)]
pub struct MiddlewareChainBuilder {
    entries: Vec<OrderedMiddleware>,
}

impl MiddlewareChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entry: OrderedMiddleware) -> Self {
        self.insert(entry);
        self
    }

    pub fn insert(&mut self, entry: OrderedMiddleware) {
        if let Some(existing) = self.position(&entry.name) {
            tracing::debug!(middleware = %entry.name, "Replacing middleware with the same name");
            self.entries.remove(existing);
        }

        let before = entry.before.as_deref().and_then(|anchor| self.position(anchor));
        let after = entry.after.as_deref().and_then(|anchor| self.position(anchor));

        let index = match (before, after) {
            (Some(index), _) => index,
            (None, Some(index)) => index + 1,
            (None, None) => {
                if let Some(anchor) = entry.before.as_deref().or(entry.after.as_deref()) {
                    tracing::warn!(
                        middleware = %entry.name,
                        anchor,
                        "Middleware anchor not found, appending to the end of the chain"
                    );
                }
                self.entries.len()
            }
        };

        self.entries.insert(index, entry);
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 解析所有中间件并生成管道
    pub async fn build(self, context: &ApplicationContext) -> ContainerResult<Pipeline> {
        let mut resolved = Vec::with_capacity(self.entries.len());

        for entry in self.entries {
            let middleware = match entry.token {
                MiddlewareToken::Instance(middleware) => middleware,
                MiddlewareToken::Bean(bean) => {
                    let shared = context.get_bean_typed::<Arc<dyn Middleware>>(&bean).await?;
                    Arc::clone(&*shared)
                }
            };
            resolved.push((entry.name, middleware));
        }

        let pipeline = Pipeline::new(resolved);
        tracing::debug!(chain = ?pipeline.names(), "Middleware chain built");
        Ok(pipeline)
    }
}

/// 请求日志中间件
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging;

#[async_trait]
impl Middleware for RequestLogging {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        let method = ctx.method().clone();
        let uri = ctx.uri().clone();
        let start = Instant::now();

        let result = next.run(ctx).await;

        let status = match &result {
            Ok(()) => ctx.response_status(),
            Err(e) => e.status_code(),
        };

        tracing::info!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            elapsed = ?start.elapsed(),
            "Request completed"
        );

        result
    }
}

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// 请求 ID 中间件：沿用客户端给出的 X-Request-ID，否则生成一个
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        let request_id = ctx
            .header_value(X_REQUEST_ID.as_str())
            .filter(|value| !value.is_empty())
            .cloned()
            .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());

        let Some(request_id) = request_id else {
            return next.run(ctx).await;
        };

        ctx.set_header(X_REQUEST_ID, request_id.clone());

        next.run(ctx).await.map_err(|error| {
            let mut headers = HeaderMap::new();
            headers.insert(X_REQUEST_ID, request_id);
            error.with_headers(headers)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResponseBody;
    use crate::error::WebError;
    use http::{Method, StatusCode, Uri};

    /// 把自己的名字追加到 x-trace 响应头
    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
            let trace = match ctx.response_header("x-trace") {
                Some(existing) => format!("{},{}", existing, self.0),
                None => self.0.to_string(),
            };
            ctx.try_set_header(HeaderName::from_static("x-trace"), &trace)?;
            next.run(ctx).await
        }
    }

    struct Stop;

    #[async_trait]
    impl Middleware for Stop {
        async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> WebResult<()> {
            ctx.set_status(StatusCode::OK);
            ctx.set_body(ResponseBody::Text("stopped".to_string()));
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Middleware for Fail {
        async fn handle(&self, _ctx: &mut RequestContext, _next: Next<'_>) -> WebResult<()> {
            Err(WebError::not_found())
        }
    }

    fn tag(name: &'static str) -> OrderedMiddleware {
        OrderedMiddleware::new(name, Tag(name))
    }

    fn request() -> RequestContext {
        RequestContext::new(Method::GET, Uri::from_static("/"))
    }

    #[test]
    fn test_before_and_after() {
        let mut builder = MiddlewareChainBuilder::new();
        builder.insert(tag("logger"));
        builder.insert(tag("router"));
        builder.insert(tag("auth").before("router"));
        builder.insert(tag("metrics").after("logger"));

        assert_eq!(builder.names(), vec!["logger", "metrics", "auth", "router"]);
    }

    #[test]
    fn test_before_wins_over_after() {
        let builder = MiddlewareChainBuilder::new()
            .with(tag("a"))
            .with(tag("b"))
            .with(tag("c"))
            .with(tag("x").before("a").after("c"));

        assert_eq!(builder.names(), vec!["x", "a", "b", "c"]);
    }

    #[test]
    fn test_missing_anchor_appends() {
        let builder = MiddlewareChainBuilder::new()
            .with(tag("a"))
            .with(tag("x").before("missing"))
            .with(tag("b"));

        assert_eq!(builder.names(), vec!["a", "x", "b"]);
    }

    #[test]
    fn test_later_insertion_with_same_name_wins() {
        let builder = MiddlewareChainBuilder::new()
            .with(tag("a"))
            .with(tag("b"))
            .with(tag("c"))
            .with(tag("a").after("c"));

        assert_eq!(builder.names(), vec!["b", "c", "a"]);
        assert_eq!(builder.len(), 3);
    }

    #[test]
    fn test_earlier_constraints_are_not_rebalanced() {
        // x 在插入时位于 b 之前，之后插入到 x 前面的 y 不会让 x 重新贴近 b
        let builder = MiddlewareChainBuilder::new()
            .with(tag("a"))
            .with(tag("b"))
            .with(tag("x").before("b"))
            .with(tag("y").after("a"));

        assert_eq!(builder.names(), vec!["a", "y", "x", "b"]);
    }

    #[tokio::test]
    async fn test_pipeline_runs_in_order() {
        let context = ApplicationContext::new();
        let pipeline = MiddlewareChainBuilder::new()
            .with(tag("second"))
            .with(tag("first").before("second"))
            .build(&context)
            .await
            .unwrap();

        let mut ctx = request();
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_header("x-trace"), Some("first,second"));
    }

    #[tokio::test]
    async fn test_not_calling_next_terminates() {
        let context = ApplicationContext::new();
        let pipeline = MiddlewareChainBuilder::new()
            .with(OrderedMiddleware::new("stop", Stop))
            .with(tag("never"))
            .build(&context)
            .await
            .unwrap();

        let mut ctx = request();
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_header("x-trace"), None);
        assert_eq!(ctx.body(), &ResponseBody::Text("stopped".to_string()));
    }

    #[tokio::test]
    async fn test_bean_token_resolves_from_container() {
        let context = ApplicationContext::new();
        let audit: Arc<dyn Middleware> = Arc::new(Tag("audit"));
        context.register_instance("auditMiddleware", audit).unwrap();

        let pipeline = MiddlewareChainBuilder::new()
            .with(OrderedMiddleware::bean("audit", "auditMiddleware"))
            .build(&context)
            .await
            .unwrap();

        let mut ctx = request();
        pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.response_header("x-trace"), Some("audit"));
    }

    #[tokio::test]
    async fn test_missing_bean_fails_build() {
        let context = ApplicationContext::new();
        let result = MiddlewareChainBuilder::new()
            .with(OrderedMiddleware::bean("audit", "auditMiddleware"))
            .build(&context)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_id_generated_and_kept_on_error() {
        let context = ApplicationContext::new();
        let pipeline = MiddlewareChainBuilder::new()
            .with(OrderedMiddleware::new("requestId", RequestId))
            .with(OrderedMiddleware::new("fail", Fail))
            .build(&context)
            .await
            .unwrap();

        let mut ctx = request();
        let error = pipeline.run(&mut ctx).await.unwrap_err();

        let generated = ctx.response_header("x-request-id").unwrap().to_string();
        assert_eq!(generated.len(), 36);
        assert_eq!(
            error.headers().and_then(|h| h.get("x-request-id")).unwrap(),
            generated.as_str()
        );
    }

    #[tokio::test]
    async fn test_request_id_reuses_client_value() {
        let mut ctx = request().with_header(X_REQUEST_ID, "abc-123");
        RequestId.handle(&mut ctx, Next::end()).await.unwrap();

        assert_eq!(ctx.response_header("x-request-id"), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_request_logging_passes_result_through() {
        let context = ApplicationContext::new();
        let pipeline = MiddlewareChainBuilder::new()
            .with(OrderedMiddleware::new("logging", RequestLogging))
            .with(OrderedMiddleware::new("fail", Fail))
            .build(&context)
            .await
            .unwrap();

        let mut ctx = request();
        let error = pipeline.run(&mut ctx).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }
}
