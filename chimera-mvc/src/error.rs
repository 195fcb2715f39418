//! Web 层错误类型
//!
//! 分发核心识别的错误种类与 HTTP 状态码一一对应，
//! 其他任何错误都视为内部错误：状态码固定为 500，消息不回显给调用方。

use axum::response::{IntoResponse, Response};
use chimera_core::ContainerError;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

pub type WebResult<T> = Result<T, WebError>;

/// Web 层错误类型
#[derive(Error, Debug)]
pub enum WebError {
    /// 没有任何路由元数据匹配请求 - 404
    #[error("{0}")]
    NotFound(String),

    /// 预检请求走到了普通分发入口，或参数转换失败 - 400
    #[error("{0}")]
    BadRequest(String),

    /// 授权检查失败 - 401
    #[error("{0}")]
    Unauthorized(String),

    /// 应用代码抛出的其他 HTTP 错误
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// 未识别的错误 - 500
    #[error(transparent)]
    Internal(anyhow::Error),

    /// 携带响应头的错误（CORS keepHeadersOnError）
    #[error("{source}")]
    WithHeaders {
        source: Box<WebError>,
        headers: HeaderMap,
    },
}

impl WebError {
    pub fn not_found() -> Self {
        WebError::NotFound("Not Found".to_string())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError::BadRequest(message.into())
    }

    pub fn unauthorized() -> Self {
        WebError::Unauthorized("Unauthorized".to_string())
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        WebError::Status {
            status,
            message: message.into(),
        }
    }

    /// 获取错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::Status { status, .. } => *status,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::WithHeaders { source, .. } => source.status_code(),
        }
    }

    /// 是否是可以直接翻译为响应的已识别错误
    pub fn is_recognized(&self) -> bool {
        match self {
            WebError::Internal(_) => false,
            WebError::WithHeaders { source, .. } => source.is_recognized(),
            _ => true,
        }
    }

    /// 消息是否可以回显给调用方：已识别的错误（包括 5xx）原样回显，只隐藏内部错误
    pub fn expose(&self) -> bool {
        self.is_recognized()
    }

    /// 返回给调用方的消息
    pub fn public_message(&self) -> String {
        if self.expose() {
            self.to_string()
        } else {
            self.status_code()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        }
    }

    /// 附加的响应头
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            WebError::WithHeaders { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// 附加响应头，已有的同名头会被覆盖
    pub fn with_headers(self, headers: HeaderMap) -> Self {
        match self {
            WebError::WithHeaders {
                source,
                headers: mut existing,
            } => {
                existing.extend(headers);
                WebError::WithHeaders {
                    source,
                    headers: existing,
                }
            }
            other => WebError::WithHeaders {
                source: Box::new(other),
                headers,
            },
        }
    }
}

/// 处理器通过 anyhow 返回的 WebError 保持原样，其他错误视为内部错误
impl From<anyhow::Error> for WebError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<WebError>() {
            Ok(web_error) => web_error,
            Err(other) => WebError::Internal(other),
        }
    }
}

impl From<ContainerError> for WebError {
    fn from(error: ContainerError) -> Self {
        WebError::Internal(error.into())
    }
}

/// 管道边界的错误响应：错误状态码、仅错误自带的响应头、纯文本消息
impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();
        let headers = self.headers().cloned().unwrap_or_default();

        let mut response = (status, message).into_response();
        response.headers_mut().extend(headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_status_codes() {
        assert_eq!(WebError::not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(WebError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(WebError::unauthorized().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            WebError::status(StatusCode::CONFLICT, "taken").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            WebError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_anyhow_round_trip_keeps_kind() {
        let error: anyhow::Error = WebError::bad_request("invalid id").into();
        let web_error = WebError::from(error);
        assert!(matches!(web_error, WebError::BadRequest(ref m) if m == "invalid id"));

        let other = WebError::from(anyhow::anyhow!("database down"));
        assert!(!other.is_recognized());
        assert_eq!(other.public_message(), "Internal Server Error");
    }

    #[test]
    fn test_recognized_server_error_keeps_message() {
        let error = WebError::status(StatusCode::SERVICE_UNAVAILABLE, "maintenance window");
        assert!(error.expose());
        assert_eq!(error.public_message(), "maintenance window");

        let wrapped = WebError::Internal(anyhow::anyhow!("pool exhausted"))
            .with_headers(HeaderMap::new());
        assert!(!wrapped.expose());
        assert_eq!(wrapped.public_message(), "Internal Server Error");
    }

    #[test]
    fn test_with_headers_merges() {
        let mut first = HeaderMap::new();
        first.insert("x-a", HeaderValue::from_static("1"));
        let mut second = HeaderMap::new();
        second.insert("x-b", HeaderValue::from_static("2"));

        let error = WebError::not_found().with_headers(first).with_headers(second);
        let headers = error.headers().unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(error.to_string(), "Not Found");
    }
}
