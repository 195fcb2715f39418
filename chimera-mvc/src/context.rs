//! 请求上下文
//!
//! 一次请求在整个管道中共享的可变状态：请求侧只读，响应侧（状态码、响应头、响应体）
//! 由中间件和分发器逐步填充，最后由服务器转换为 axum 响应。

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, VARY};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde_json::Value;

use crate::error::{WebError, WebResult};

/// 响应体
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
    Json(Value),
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// 请求上下文
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    raw_body: Bytes,
    request_body: Option<Value>,

    status: Option<StatusCode>,
    response_headers: HeaderMap,
    content_type: Option<String>,
    body: ResponseBody,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            request_headers: HeaderMap::new(),
            raw_body: Bytes::new(),
            request_body: None,
            status: None,
            response_headers: HeaderMap::new(),
            content_type: None,
            body: ResponseBody::Empty,
        }
    }

    /// 从 HTTP 请求构建上下文，JSON 请求体会被预先解析
    ///
    /// 请求体不是合法 JSON 时 `request_body()` 为 None，原始字节仍可通过 `raw_body()` 获取
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let mut ctx = Self::new(parts.method, parts.uri);
        ctx.request_headers = parts.headers;

        if !body.is_empty() && ctx.is_json_request() {
            match serde_json::from_slice(&body) {
                Ok(value) => ctx.request_body = Some(value),
                Err(e) => tracing::debug!(error = %e, "Request body is not valid JSON"),
            }
        }
        ctx.raw_body = body;
        ctx
    }

    /// 添加请求头（构建请求时使用）
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.request_headers.append(name, value);
            }
            Err(e) => tracing::warn!(header = %name, error = %e, "Ignoring invalid header value"),
        }
        self
    }

    /// 设置已解析的请求体（构建请求时使用）
    pub fn with_body(mut self, body: Value) -> Self {
        self.request_body = Some(body);
        self
    }

    fn is_json_request(&self) -> bool {
        match self.header(CONTENT_TYPE.as_str()) {
            Some(content_type) => content_type.contains("json"),
            // 没有声明类型时也尝试按 JSON 解析
            None => true,
        }
    }

    // ========== 请求侧 ==========

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// 读取请求头，非 ASCII 值视为不存在
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn header_value(&self, name: &str) -> Option<&HeaderValue> {
        self.request_headers.get(name)
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn request_body(&self) -> Option<&Value> {
        self.request_body.as_ref()
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    // ========== 响应侧 ==========

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// 设置来自配置或拼接的字符串响应头
    pub fn try_set_header(&mut self, name: HeaderName, value: &str) -> WebResult<()> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            WebError::Internal(anyhow::anyhow!("invalid value for header {}: {}", name, e))
        })?;
        self.set_header(name, value);
        Ok(())
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// 向 Vary 追加字段，已存在时不重复
    pub fn vary(&mut self, field: &str) {
        let existing = self.response_header(VARY.as_str()).unwrap_or_default();
        let present = existing
            .split(',')
            .map(str::trim)
            .any(|f| f == "*" || f.eq_ignore_ascii_case(field));
        if present {
            return;
        }

        let combined = if existing.is_empty() {
            field.to_string()
        } else {
            format!("{}, {}", existing, field)
        };
        if let Ok(value) = HeaderValue::from_str(&combined) {
            self.response_headers.insert(VARY, value);
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// 最终的响应状态码：未设置时有响应体为 200，否则为 404
    pub fn response_status(&self) -> StatusCode {
        self.status.unwrap_or(if self.body.is_empty() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        })
    }

    /// 是否已经有中间件写入了响应
    pub fn has_response(&self) -> bool {
        self.status.is_some() || !self.body.is_empty()
    }

    /// 用错误填充响应：状态码和可回显的消息
    pub fn fail(&mut self, error: &WebError) {
        self.status = Some(error.status_code());
        self.content_type = Some("text/plain; charset=utf-8".to_string());
        self.body = ResponseBody::Text(error.public_message());
        if let Some(headers) = error.headers() {
            self.response_headers.extend(headers.clone());
        }
    }
}

impl IntoResponse for RequestContext {
    fn into_response(self) -> Response {
        // 没有任何中间件写入响应时按 404 处理
        let status = self.response_status();

        let body = match self.body {
            ResponseBody::Empty if status == StatusCode::NOT_FOUND && self.status.is_none() => {
                Body::from("Not Found")
            }
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Text(text) => Body::from(text),
            ResponseBody::Binary(bytes) => Body::from(bytes),
            ResponseBody::Json(value) => Body::from(value.to_string()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = self.response_headers;

        if let Some(content_type) = self.content_type {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
        }

        response
    }
}
