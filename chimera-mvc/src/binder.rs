//! 参数绑定
//!
//! 把路径中的 REST 参数和请求体字段转换为处理方法按声明顺序期望的参数列表。
//!
//! - 简单类型（字符串、布尔、数字、日期）消费 REST 参数值，一个值最多被一个参数消费
//! - 模型类型从容器获取实例，再用请求体中同名字段覆盖其可绑定字段
//! - 转换失败统一包装为 400 Bad Request
//! - 无法解析的参数不占位，参数列表中不会出现空值

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use chimera_core::SharedBean;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::container::HandlerContainer;
use crate::context::RequestContext;
use crate::error::{WebError, WebResult};
use crate::matcher::{relative_path, rest_value};
use crate::metadata::RouteMetadata;

/// 可从请求体绑定的模型
///
/// 实例由容器创建（通常注册为原型 Bean），绑定时只覆盖 `bindable_fields` 中声明的字段
pub trait RequestModel: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn bindable_fields() -> &'static [&'static str];
}

type Snapshot = fn(&(dyn Any + Send + Sync)) -> anyhow::Result<Value>;
type Materialize = fn(Value) -> anyhow::Result<SharedBean>;

fn snapshot<T: RequestModel>(instance: &(dyn Any + Send + Sync)) -> anyhow::Result<Value> {
    let model = instance
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("bean is not a {}", std::any::type_name::<T>()))?;
    Ok(serde_json::to_value(model)?)
}

fn materialize<T: RequestModel>(value: Value) -> anyhow::Result<SharedBean> {
    let model: T = serde_json::from_value(value)?;
    Ok(Arc::new(model))
}

/// 模型参数的绑定信息
#[derive(Clone)]
pub struct ModelBinding {
    token: String,
    type_name: &'static str,
    fields: &'static [&'static str],
    snapshot: Snapshot,
    materialize: Materialize,
}

impl ModelBinding {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }
}

impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBinding")
            .field("token", &self.token)
            .field("type", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// 处理方法声明的参数类型
#[derive(Debug, Clone)]
pub enum ParamType {
    String,
    Boolean,
    Number,
    Date,
    Model(ModelBinding),
}

impl ParamType {
    /// 模型参数，`token` 是模型在容器中的名称
    pub fn model<T: RequestModel>(token: impl Into<String>) -> Self {
        ParamType::Model(ModelBinding {
            token: token.into(),
            type_name: std::any::type_name::<T>(),
            fields: T::bindable_fields(),
            snapshot: snapshot::<T>,
            materialize: materialize::<T>,
        })
    }
}

/// 已绑定的模型参数，按值比较
#[derive(Clone)]
pub struct ModelArg {
    type_name: &'static str,
    value: Value,
    instance: SharedBean,
}

impl ModelArg {
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for ModelArg {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.value == other.value
    }
}

impl fmt::Debug for ModelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelArg")
            .field("type", &self.type_name)
            .field("value", &self.value)
            .finish()
    }
}

/// 单个已绑定参数
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    String(String),
    Boolean(bool),
    Number(f64),
    Date(DateTime<Utc>),
    Model(ModelArg),
}

/// 按声明顺序排列的参数列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        match self.get(index)? {
            Arg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn boolean(&self, index: usize) -> Option<bool> {
        match self.get(index)? {
            Arg::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        match self.get(index)? {
            Arg::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, index: usize) -> Option<DateTime<Utc>> {
        match self.get(index)? {
            Arg::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn model<T: Any + Send + Sync>(&self, index: usize) -> Option<Arc<T>> {
        match self.get(index)? {
            Arg::Model(model) => Arc::clone(&model.instance).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(anyhow!("'{}' is not a boolean", raw)),
    }
}

/// RFC 3339、`YYYY-MM-DD` 或毫秒时间戳
fn parse_date(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    if let Ok(millis) = raw.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_millis_opt(millis).single() {
            return Ok(dt);
        }
    }
    Err(anyhow!("'{}' is not a valid date", raw))
}

/// 把原始字符串转换为简单类型参数
fn convert(param: &ParamType, raw: &str) -> anyhow::Result<Arg> {
    Ok(match param {
        ParamType::String => Arg::String(raw.to_string()),
        ParamType::Boolean => Arg::Boolean(parse_bool(raw)?),
        ParamType::Number => Arg::Number(raw.parse::<f64>()?),
        ParamType::Date => Arg::Date(parse_date(raw)?),
        ParamType::Model(binding) => {
            return Err(anyhow!("{} cannot be bound from a path segment", binding.type_name))
        }
    })
}

/// 参数绑定器
pub struct ParameterBinder<'a> {
    container: &'a dyn HandlerContainer,
}

impl<'a> ParameterBinder<'a> {
    pub fn new(container: &'a dyn HandlerContainer) -> Self {
        Self { container }
    }

    /// 按声明顺序绑定参数，`mount` 是控制器挂载前缀
    pub async fn bind(
        &self,
        mount: &str,
        route: &RouteMetadata,
        params: &[ParamType],
        ctx: &RequestContext,
    ) -> WebResult<Args> {
        let relative = relative_path(mount, ctx.path());
        let mut rest = rest_value(&route.route, &relative);
        let mut args = Vec::with_capacity(params.len());

        for param in params {
            if let ParamType::Model(binding) = param {
                args.push(self.bind_model(binding, ctx).await?);
                continue;
            }

            if let Some(raw) = rest.take() {
                let arg = convert(param, raw).map_err(|e| WebError::bad_request(e.to_string()))?;
                args.push(arg);
            }
        }

        Ok(Args(args))
    }

    async fn bind_model(&self, binding: &ModelBinding, ctx: &RequestContext) -> WebResult<Arg> {
        let instance = self.container.get(&binding.token).await?;
        let mut value = (binding.snapshot)(instance.as_ref()).map_err(WebError::Internal)?;

        if let (Value::Object(target), Some(Value::Object(body))) = (&mut value, ctx.request_body())
        {
            for field in binding.fields {
                if let Some(field_value) = body.get(*field) {
                    target.insert((*field).to_string(), field_value.clone());
                }
            }
        }

        let instance =
            (binding.materialize)(value.clone()).map_err(|e| WebError::bad_request(e.to_string()))?;

        Ok(Arg::Model(ModelArg {
            type_name: binding.type_name,
            value,
            instance,
        }))
    }
}
