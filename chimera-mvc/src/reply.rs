//! 处理方法返回值与响应序列化
//!
//! 处理方法通过 [`Reply`] 返回结果：
//!
//! - 字符串写入响应体，默认类型 `text/html`
//! - 二进制原样写入响应体
//! - [`ActionResult`] 自行渲染（JSON、视图、文件、重定向）
//! - 其他对象序列化为 JSON，默认类型 `application/json`
//!
//! 路由声明的 `content_type` 会覆盖文本和对象的默认类型。

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, LOCATION};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::constants::TEMPLATE_ENGINE_BEAN;
use crate::container::HandlerContainer;
use crate::context::{RequestContext, ResponseBody};
use crate::error::{WebError, WebResult};
use crate::metadata::RouteMetadata;
use crate::template::TemplateEngine;

pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// 处理方法的返回值
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Binary(Bytes),
    Action(ActionResult),
    Object(Value),
    /// 没有返回值：204 No Content
    Empty,
}

impl Reply {
    /// 把任意可序列化的值作为对象返回
    pub fn json<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Reply::Object(serde_json::to_value(value)?))
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&'static str> for Reply {
    fn from(text: &'static str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Reply::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Reply::Binary(bytes)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Object(value)
    }
}

impl From<ActionResult> for Reply {
    fn from(result: ActionResult) -> Self {
        Reply::Action(result)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

/// 能自行渲染的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Json {
        value: Value,
        status: Option<StatusCode>,
    },
    View {
        template: String,
        model: Value,
    },
    File {
        path: PathBuf,
        content_type: Option<String>,
        /// 设置后以附件形式下载
        download_name: Option<String>,
    },
    Redirect {
        url: String,
        permanent: bool,
    },
}

impl ActionResult {
    pub fn json(value: Value) -> Self {
        ActionResult::Json {
            value,
            status: None,
        }
    }

    pub fn json_with_status(value: Value, status: StatusCode) -> Self {
        ActionResult::Json {
            value,
            status: Some(status),
        }
    }

    pub fn view(template: impl Into<String>, model: Value) -> Self {
        ActionResult::View {
            template: template.into(),
            model,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ActionResult::File {
            path: path.into(),
            content_type: None,
            download_name: None,
        }
    }

    pub fn download(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        ActionResult::File {
            path: path.into(),
            content_type: None,
            download_name: Some(name.into()),
        }
    }

    /// 302 Found
    pub fn redirect(url: impl Into<String>) -> Self {
        ActionResult::Redirect {
            url: url.into(),
            permanent: false,
        }
    }

    /// 301 Moved Permanently
    pub fn permanent_redirect(url: impl Into<String>) -> Self {
        ActionResult::Redirect {
            url: url.into(),
            permanent: true,
        }
    }

    /// 把结果写入响应
    pub async fn send(
        self,
        ctx: &mut RequestContext,
        container: &dyn HandlerContainer,
    ) -> WebResult<()> {
        match self {
            ActionResult::Json { value, status } => {
                ctx.set_status(status.unwrap_or(StatusCode::OK));
                ctx.set_content_type(APPLICATION_JSON);
                ctx.set_body(ResponseBody::Json(value));
            }
            ActionResult::View { template, model } => {
                let engine = container
                    .get(TEMPLATE_ENGINE_BEAN)
                    .await?
                    .downcast::<TemplateEngine>()
                    .map_err(|_| anyhow!("bean '{}' is not a TemplateEngine", TEMPLATE_ENGINE_BEAN))?;
                let html = engine
                    .render(&template, &model)
                    .map_err(|e| WebError::Internal(e.into()))?;

                ctx.set_status(StatusCode::OK);
                ctx.set_content_type(TEXT_HTML);
                ctx.set_body(ResponseBody::Text(html));
            }
            ActionResult::File {
                path,
                content_type,
                download_name,
            } => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        WebError::not_found()
                    } else {
                        WebError::Internal(anyhow!("failed to read {}: {}", path.display(), e))
                    }
                })?;

                let content_type =
                    content_type.unwrap_or_else(|| guess_content_type(&path).to_string());
                if let Some(name) = download_name {
                    ctx.try_set_header(
                        CONTENT_DISPOSITION,
                        &format!("attachment; filename=\"{}\"", name),
                    )?;
                }

                ctx.set_status(StatusCode::OK);
                ctx.set_content_type(content_type);
                ctx.set_body(ResponseBody::Binary(Bytes::from(bytes)));
            }
            ActionResult::Redirect { url, permanent } => {
                let status = if permanent {
                    StatusCode::MOVED_PERMANENTLY
                } else {
                    StatusCode::FOUND
                };
                ctx.try_set_header(LOCATION, &url)?;
                ctx.set_status(status);
                ctx.set_body(ResponseBody::Empty);
            }
        }
        Ok(())
    }
}

/// 按扩展名推断文件类型
pub fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => APPLICATION_JSON,
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("zip") => "application/zip",
        _ => OCTET_STREAM,
    }
}

/// 把处理方法的返回值写入响应
pub async fn write_reply(
    reply: Reply,
    route: &RouteMetadata,
    ctx: &mut RequestContext,
    container: &dyn HandlerContainer,
) -> WebResult<()> {
    let declared = route.content_type.clone();

    match reply {
        Reply::Text(text) => {
            ctx.set_status(StatusCode::OK);
            ctx.set_content_type(declared.unwrap_or_else(|| TEXT_HTML.to_string()));
            ctx.set_body(ResponseBody::Text(text));
        }
        Reply::Binary(bytes) => {
            ctx.set_status(StatusCode::OK);
            ctx.set_content_type(declared.unwrap_or_else(|| OCTET_STREAM.to_string()));
            ctx.set_body(ResponseBody::Binary(bytes));
        }
        Reply::Action(result) => return result.send(ctx, container).await,
        Reply::Object(value) => {
            ctx.set_status(StatusCode::OK);
            ctx.set_content_type(declared.unwrap_or_else(|| APPLICATION_JSON.to_string()));
            ctx.set_body(ResponseBody::Json(value));
        }
        Reply::Empty => {
            ctx.set_status(StatusCode::NO_CONTENT);
            ctx.set_body(ResponseBody::Empty);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{HandlerRegistry, WebContainer};
    use crate::metadata::RouteMethod;
    use chimera_core::ApplicationContext;
    use http::{Method, Uri};
    use serde_json::json;
    use std::sync::Arc;

    fn container() -> WebContainer {
        let context = ApplicationContext::new();
        let engine = TemplateEngine::empty();
        engine
            .add_template("user.html", "<p>{{ name }}</p>")
            .unwrap();
        context.register_instance(TEMPLATE_ENGINE_BEAN, engine).unwrap();
        WebContainer::new(Arc::new(context), HandlerRegistry::new())
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, Uri::from_static("/"))
    }

    fn route() -> RouteMetadata {
        RouteMetadata::new(RouteMethod::Get, "/", "index")
    }

    #[tokio::test]
    async fn test_text_defaults_to_html() {
        let container = container();
        let mut ctx = ctx();

        write_reply("hi".into(), &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::OK));
        assert_eq!(ctx.content_type(), Some(TEXT_HTML));
        assert_eq!(ctx.body(), &ResponseBody::Text("hi".to_string()));
    }

    #[tokio::test]
    async fn test_declared_content_type_overrides_default() {
        let container = container();
        let mut ctx = ctx();
        let route = route().with_content_type("text/plain");

        write_reply("hi".into(), &route, &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.content_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_declared_content_type_for_object_and_binary() {
        let container = container();

        let mut object_ctx = ctx();
        let hal = route().with_content_type("application/hal+json");
        write_reply(Reply::Object(json!({ "id": 7 })), &hal, &mut object_ctx, &container)
            .await
            .unwrap();
        assert_eq!(object_ctx.content_type(), Some("application/hal+json"));
        assert_eq!(object_ctx.body(), &ResponseBody::Json(json!({ "id": 7 })));

        let mut binary_ctx = ctx();
        let png = route().with_content_type("image/png");
        write_reply(vec![0x89u8, 0x50].into(), &png, &mut binary_ctx, &container)
            .await
            .unwrap();
        assert_eq!(binary_ctx.content_type(), Some("image/png"));
        assert_eq!(
            binary_ctx.body(),
            &ResponseBody::Binary(Bytes::from_static(&[0x89, 0x50]))
        );
    }

    #[tokio::test]
    async fn test_binary_defaults_to_octet_stream() {
        let container = container();
        let mut ctx = ctx();

        write_reply(Reply::Binary(Bytes::from_static(b"raw")), &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::OK));
        assert_eq!(ctx.content_type(), Some(OCTET_STREAM));
    }

    #[tokio::test]
    async fn test_object_is_json() {
        let container = container();
        let mut ctx = ctx();

        let reply = Reply::json(&vec![42]).unwrap();
        write_reply(reply, &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.content_type(), Some(APPLICATION_JSON));
        assert_eq!(ctx.body(), &ResponseBody::Json(json!([42])));
    }

    #[tokio::test]
    async fn test_empty_is_no_content() {
        let container = container();
        let mut ctx = ctx();

        write_reply(Reply::Empty, &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::NO_CONTENT));
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_json_result_with_status() {
        let container = container();
        let mut ctx = ctx();

        let result = ActionResult::json_with_status(json!({ "id": 1 }), StatusCode::CREATED);
        write_reply(result.into(), &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::CREATED));
        assert_eq!(ctx.content_type(), Some(APPLICATION_JSON));
    }

    #[tokio::test]
    async fn test_view_result_uses_template_engine() {
        let container = container();
        let mut ctx = ctx();

        let result = ActionResult::view("user.html", json!({ "name": "alice" }));
        write_reply(result.into(), &route(), &mut ctx, &container)
            .await
            .unwrap();

        assert_eq!(ctx.body(), &ResponseBody::Text("<p>alice</p>".to_string()));
        assert_eq!(ctx.content_type(), Some(TEXT_HTML));
    }

    #[tokio::test]
    async fn test_view_without_engine_is_internal() {
        let container = WebContainer::new(Arc::new(ApplicationContext::new()), HandlerRegistry::new());
        let mut ctx = ctx();

        let result = ActionResult::view("user.html", json!({}));
        let error = write_reply(result.into(), &route(), &mut ctx, &container)
            .await
            .unwrap_err();

        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_redirect() {
        let container = container();
        let mut ctx = ctx();

        write_reply(
            ActionResult::redirect("/login").into(),
            &route(),
            &mut ctx,
            &container,
        )
        .await
        .unwrap();

        assert_eq!(ctx.status(), Some(StatusCode::FOUND));
        assert_eq!(ctx.response_header("location"), Some("/login"));
    }

    #[tokio::test]
    async fn test_file_result() {
        let container = container();
        let mut ctx = ctx();
        let path = std::env::temp_dir().join(format!("chimera-reply-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"report").await.unwrap();

        write_reply(
            ActionResult::download(&path, "report.txt").into(),
            &route(),
            &mut ctx,
            &container,
        )
        .await
        .unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(ctx.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(
            ctx.response_header("content-disposition"),
            Some("attachment; filename=\"report.txt\"")
        );
        assert_eq!(ctx.body(), &ResponseBody::Binary(Bytes::from_static(b"report")));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let container = container();
        let mut ctx = ctx();

        let error = write_reply(
            ActionResult::file("/definitely/not/here.bin").into(),
            &route(),
            &mut ctx,
            &container,
        )
        .await
        .unwrap_err();

        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }
}
