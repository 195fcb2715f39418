//! 路由树
//!
//! 每个控制器对应一个 [`RouteNode`]，节点内部是一条固定的小管道：CORS 阶段 + 分发器。
//! [`RootRoute`] 持有所有节点，按挂载前缀把请求交给对应节点。

use std::sync::Arc;

use async_trait::async_trait;

use crate::container::HandlerContainer;
use crate::context::RequestContext;
use crate::cors::{CorsMiddleware, CorsOptions};
use crate::dispatcher::{Authorization, Dispatcher};
use crate::error::WebResult;
use crate::metadata::ControllerMetadata;
use crate::middleware::{Middleware, Next, Pipeline};

/// 单个控制器的路由节点
pub struct RouteNode {
    controller: Arc<ControllerMetadata>,
    pipeline: Pipeline,
}

impl RouteNode {
    pub fn new(
        controller: Arc<ControllerMetadata>,
        container: Arc<dyn HandlerContainer>,
        authorization: Option<Arc<dyn Authorization>>,
        cors: Arc<CorsOptions>,
    ) -> Self {
        let cors = CorsMiddleware::new(cors, Arc::clone(&controller));
        let dispatcher = Dispatcher::new(container, Arc::clone(&controller))
            .with_authorization(authorization);

        let pipeline = Pipeline::new(vec![
            ("cors".to_string(), Arc::new(cors) as Arc<dyn Middleware>),
            ("dispatch".to_string(), Arc::new(dispatcher) as Arc<dyn Middleware>),
        ]);

        Self {
            controller,
            pipeline,
        }
    }

    pub fn mount(&self) -> &str {
        self.controller.mount()
    }

    pub fn controller(&self) -> &Arc<ControllerMetadata> {
        &self.controller
    }

    /// 请求路径是否落在挂载前缀之下（按路径段边界）
    pub fn owns(&self, path: &str) -> bool {
        let mount = self.mount();
        if mount.is_empty() {
            return true;
        }
        match path.strip_prefix(mount) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub async fn handle(&self, ctx: &mut RequestContext) -> WebResult<()> {
        self.pipeline.run(ctx).await
    }
}

/// 路由树根节点
#[derive(Default)]
pub struct RootRoute {
    nodes: Vec<RouteNode>,
}

impl RootRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点，挂载前缀更长的节点优先
    pub fn add(&mut self, node: RouteNode) {
        if let Some(existing) = self.nodes.iter().find(|n| n.mount() == node.mount()) {
            tracing::warn!(
                mount = %node.mount(),
                existing = %existing.controller().token(),
                controller = %node.controller().token(),
                "Two controllers share a mount prefix, the first registered one takes precedence"
            );
        }
        self.nodes.push(node);
        // 稳定排序：同一前缀保持注册顺序
        self.nodes
            .sort_by(|a, b| b.mount().len().cmp(&a.mount().len()));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 选择负责该路径的节点
    pub fn find(&self, path: &str) -> Option<&RouteNode> {
        self.nodes.iter().find(|node| node.owns(path))
    }
}

#[async_trait]
impl Middleware for RootRoute {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        match self.find(ctx.path()) {
            Some(node) => {
                tracing::trace!(
                    path = %ctx.path(),
                    controller = %node.controller().token(),
                    "Routing request"
                );
                node.handle(ctx).await
            }
            None => next.run(ctx).await,
        }
    }
}
