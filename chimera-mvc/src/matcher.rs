//! 路由匹配
//!
//! 在一个控制器的元数据集合中为请求挑选唯一的处理方法：
//!
//! 1. 按请求方法选出对应种类的候选，跨处理方法展平
//! 2. 按路径模式长度降序排列（更长、更具体的模式优先）
//! 3. 第一轮：去掉挂载前缀后与请求路径完全相等的模式
//! 4. 第二轮：带 `/:param` 的模式，请求路径以其静态前缀开头（且不等于前缀本身）即匹配；
//!    前缀之后必须紧跟 `/`，`/users/5` 不会匹配 `/user/:id`
//!
//! 对于参数段之后还有静态部分的模式（`/users/:id/orders`），请求路径在参数段之后
//! 也必须以该静态部分开头，这样 `/users/42` 不会被 `/users/:id/orders` 抢走。

use crate::metadata::{normalize_path, ControllerMetadata, RouteMetadata, RouteMethod};

/// REST 参数标记
pub const PARAM_MARKER: &str = "/:";

/// 去掉挂载前缀并规范化的请求路径
pub fn relative_path(mount: &str, path: &str) -> String {
    let rest = path.strip_prefix(mount).unwrap_or(path);
    normalize_path(rest)
}

/// 模式中 `/:` 之前的静态前缀，不含参数时为 None
pub fn static_prefix(pattern: &str) -> Option<&str> {
    pattern.find(PARAM_MARKER).map(|idx| &pattern[..idx])
}

/// 参数段之后、下一个参数之前的静态部分
fn static_suffix(pattern: &str) -> &str {
    let Some(idx) = pattern.find(PARAM_MARKER) else {
        return "";
    };
    let after_marker = &pattern[idx + PARAM_MARKER.len()..];
    match after_marker.find('/') {
        Some(slash) => {
            let suffix = &after_marker[slash..];
            suffix.split(PARAM_MARKER).next().unwrap_or_default()
        }
        None => "",
    }
}

/// 从相对路径中提取 REST 参数值：静态前缀之后、下一个 `/` 之前的路径段
pub fn rest_value<'a>(pattern: &str, relative: &'a str) -> Option<&'a str> {
    let prefix = static_prefix(pattern)?;
    let remainder = relative.strip_prefix(prefix)?.strip_prefix('/')?;
    let segment = remainder.split('/').next()?;
    (!segment.is_empty()).then_some(segment)
}

fn rest_compatible(pattern: &str, relative: &str) -> bool {
    let Some(prefix) = static_prefix(pattern) else {
        return false;
    };
    if prefix == relative || !relative.starts_with(prefix) {
        return false;
    }
    let Some(segment) = rest_value(pattern, relative) else {
        return false;
    };

    // prefix + "/" + segment
    let after_segment = &relative[prefix.len() + 1 + segment.len()..];
    after_segment.starts_with(static_suffix(pattern))
}

/// 在候选集合中匹配相对路径
pub fn match_candidates<'a>(
    relative: &str,
    mut candidates: Vec<&'a RouteMetadata>,
) -> Option<&'a RouteMetadata> {
    // 稳定排序：同长度的模式保持声明顺序，保证结果确定
    candidates.sort_by(|a, b| b.route.len().cmp(&a.route.len()));

    if let Some(exact) = candidates.iter().copied().find(|m| m.route == relative) {
        return Some(exact);
    }

    candidates
        .into_iter()
        .find(|m| rest_compatible(&m.route, relative))
}

/// 为请求选择处理方法
pub fn match_route<'a>(
    request_path: &str,
    method: RouteMethod,
    controller: &'a ControllerMetadata,
) -> Option<&'a RouteMetadata> {
    let relative = relative_path(controller.mount(), request_path);
    let matched = match_candidates(&relative, controller.candidates(method));

    tracing::trace!(
        controller = %controller.token(),
        method = method.as_str(),
        path = %relative,
        handler = matched.map(|m| m.property_key.as_str()),
        "Route matching finished"
    );

    matched
}
