//! 路由元数据注册表
//!
//! 控制器在注册阶段显式声明每个处理方法服务的 HTTP 方法和路径模式，
//! 以及方法级 / 控制器级的 CORS 配置和授权要求。注册完成后只读。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use http::Method;

/// 路由种类，对应声明处理方法时使用的 GET / POST / PUT / DELETE / OPTIONS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl RouteMethod {
    pub const ALL: [RouteMethod; 5] = [
        RouteMethod::Get,
        RouteMethod::Post,
        RouteMethod::Put,
        RouteMethod::Delete,
        RouteMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Delete => "DELETE",
            RouteMethod::Options => "OPTIONS",
        }
    }

    /// 从请求方法名解析，无法识别时按 GET 处理
    pub fn parse(method: Option<&str>) -> Self {
        match method.map(|m| m.trim().to_ascii_uppercase()).as_deref() {
            Some("POST") => RouteMethod::Post,
            Some("PUT") => RouteMethod::Put,
            Some("DELETE") => RouteMethod::Delete,
            Some("OPTIONS") => RouteMethod::Options,
            _ => RouteMethod::Get,
        }
    }
}

impl From<&Method> for RouteMethod {
    fn from(method: &Method) -> Self {
        RouteMethod::parse(Some(method.as_str()))
    }
}

/// 把路由模式规范化为 `""`（挂载根）或以 `/` 开头且不以 `/` 结尾的形式
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// 路由元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMetadata {
    /// 规范化后的路径模式（相对于控制器挂载前缀）
    pub route: String,
    pub method: RouteMethod,
    /// 处理方法标识
    pub property_key: String,
    /// 覆盖默认响应类型
    pub content_type: Option<String>,
}

impl RouteMetadata {
    pub fn new(method: RouteMethod, route: &str, property_key: impl Into<String>) -> Self {
        Self {
            route: normalize_path(route),
            method,
            property_key: property_key.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// CORS 元数据，未设置的字段回落到全局配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsMetadata {
    pub credentials: Option<bool>,
    pub expose_headers: Option<String>,
    pub keep_headers_on_error: Option<bool>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub max_age: Option<u64>,
}

impl CorsMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn expose_headers(mut self, headers: impl Into<String>) -> Self {
        self.expose_headers = Some(headers.into());
        self
    }

    pub fn keep_headers_on_error(mut self, keep: bool) -> Self {
        self.keep_headers_on_error = Some(keep);
        self
    }

    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }
}

/// 单个控制器的全部声明
#[derive(Debug, Clone)]
pub struct ControllerMetadata {
    token: String,
    mount: String,
    /// 路由种类 -> [(处理方法, 元数据)]，保持声明顺序
    buckets: HashMap<RouteMethod, Vec<(String, Vec<RouteMetadata>)>>,
    handler_cors: HashMap<String, CorsMetadata>,
    controller_cors: Option<CorsMetadata>,
    authorized: HashSet<String>,
}

impl ControllerMetadata {
    /// `token` 是控制器在容器中的名称，`mount` 是挂载前缀
    pub fn new(token: impl Into<String>, mount: &str) -> Self {
        Self {
            token: token.into(),
            mount: normalize_path(mount),
            buckets: HashMap::new(),
            handler_cors: HashMap::new(),
            controller_cors: None,
            authorized: HashSet::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// 声明一条路由
    pub fn route(mut self, metadata: RouteMetadata) -> Self {
        let bucket = self.buckets.entry(metadata.method).or_default();
        match bucket.iter_mut().find(|(key, _)| *key == metadata.property_key) {
            Some((_, entries)) => entries.push(metadata),
            None => bucket.push((metadata.property_key.clone(), vec![metadata])),
        }
        self
    }

    pub fn get(self, route: &str, property_key: &str) -> Self {
        self.route(RouteMetadata::new(RouteMethod::Get, route, property_key))
    }

    pub fn post(self, route: &str, property_key: &str) -> Self {
        self.route(RouteMetadata::new(RouteMethod::Post, route, property_key))
    }

    pub fn put(self, route: &str, property_key: &str) -> Self {
        self.route(RouteMetadata::new(RouteMethod::Put, route, property_key))
    }

    pub fn delete(self, route: &str, property_key: &str) -> Self {
        self.route(RouteMetadata::new(RouteMethod::Delete, route, property_key))
    }

    pub fn options(self, route: &str, property_key: &str) -> Self {
        self.route(RouteMetadata::new(RouteMethod::Options, route, property_key))
    }

    /// 方法级 CORS
    pub fn cors(mut self, property_key: &str, cors: CorsMetadata) -> Self {
        self.handler_cors.insert(property_key.to_string(), cors);
        self
    }

    /// 控制器级 CORS，作用于没有方法级配置的所有处理方法
    pub fn controller_cors(mut self, cors: CorsMetadata) -> Self {
        self.controller_cors = Some(cors);
        self
    }

    /// 声明处理方法需要授权
    pub fn require_auth(mut self, property_key: &str) -> Self {
        self.authorized.insert(property_key.to_string());
        self
    }

    /// 某种路由的全部候选，跨处理方法展平，保持声明顺序
    pub fn candidates(&self, method: RouteMethod) -> Vec<&RouteMetadata> {
        self.buckets
            .get(&method)
            .map(|bucket| bucket.iter().flat_map(|(_, entries)| entries.iter()).collect())
            .unwrap_or_default()
    }

    /// 处理方法的 CORS 配置：方法级优先，其次控制器级
    pub fn cors_for(&self, property_key: &str) -> Option<&CorsMetadata> {
        self.handler_cors
            .get(property_key)
            .or(self.controller_cors.as_ref())
    }

    pub fn requires_auth(&self, property_key: &str) -> bool {
        self.authorized.contains(property_key)
    }

    /// 所有声明过的处理方法名
    pub fn property_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .buckets
            .values()
            .flat_map(|bucket| bucket.iter().map(|(key, _)| key.as_str()))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

/// 元数据注册表：控制器 token -> 控制器元数据
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    controllers: HashMap<String, Arc<ControllerMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册控制器，重复的 token 会覆盖之前的声明
    pub fn register(&mut self, metadata: ControllerMetadata) -> Arc<ControllerMetadata> {
        let metadata = Arc::new(metadata);
        if self
            .controllers
            .insert(metadata.token().to_string(), Arc::clone(&metadata))
            .is_some()
        {
            tracing::warn!(controller = %metadata.token(), "Controller metadata registered twice, keeping the latest");
        }
        metadata
    }

    pub fn get(&self, token: &str) -> Option<&Arc<ControllerMetadata>> {
        self.controllers.get(token)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Arc<ControllerMetadata>> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
