//! Cookie, DOM and extension operations

use super::{
    OpContext, OpDecl, OpResult, OpTable, arg_bool, arg_i64, arg_json, arg_opt_str, arg_str,
    arg_u32, encode_base64, op,
};
use crate::browser_extension::BrowserExtension;
use crate::cookies::CookieManager;
use crate::dom::DomOperations;
use crate::engine::Cookie;
use crate::error::BridgeResult;
use crate::handles::Category;
use serde_json::{Value, json};
use std::sync::Arc;

fn cookie_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<CookieManager>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

fn dom_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<DomOperations>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

fn extension_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<BrowserExtension>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

/// Leading `(selector, index)` pair shared by the element operations
fn target(args: &[Value]) -> BridgeResult<(&str, u32)> {
    Ok((arg_str(args, 0, "selector")?, arg_u32(args, 1, "index")?))
}

pub(super) fn tables() -> Vec<OpTable> {
    vec![cookie_table(), dom_table(), extension_table()]
}

fn cookie_table() -> OpTable {
    OpTable::new(
        Category::CookieManager,
        vec![
            cookie_op("cookies", |m, _, args| {
                let url = arg_opt_str(args, 0, "url")?.unwrap_or_default();
                Ok(json!(m.cookies(url)?))
            }),
            cookie_op("set_cookie", |m, _, args| {
                let cookie: Cookie = arg_json(args, 0, "cookie")?;
                m.set_cookie(cookie)?;
                Ok(Value::Null)
            }),
            cookie_op("delete_cookies", |m, _, args| {
                m.delete_cookies(arg_str(args, 0, "name")?, arg_str(args, 1, "url")?)?;
                Ok(Value::Null)
            }),
            cookie_op("delete_all", |m, _, _| {
                m.delete_all()?;
                Ok(Value::Null)
            }),
        ],
    )
}

fn dom_table() -> OpTable {
    OpTable::new(
        Category::Dom,
        vec![
            dom_op("click", |d, _, args| {
                let (selector, index) = target(args)?;
                d.click(selector, index)?;
                Ok(Value::Null)
            }),
            dom_op("dispatch_event", |d, _, args| {
                let (selector, index) = target(args)?;
                d.dispatch_event(selector, index, arg_str(args, 2, "event")?)?;
                Ok(Value::Null)
            }),
            dom_op("inner_text", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.inner_text(selector, index)?))
            }),
            dom_op("set_inner_text", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_inner_text(selector, index, arg_str(args, 2, "text")?)?;
                Ok(Value::Null)
            }),
            dom_op("inner_html", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.inner_html(selector, index)?))
            }),
            dom_op("set_inner_html", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_inner_html(selector, index, arg_str(args, 2, "html")?)?;
                Ok(Value::Null)
            }),
            dom_op("outer_text", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.outer_text(selector, index)?))
            }),
            dom_op("outer_html", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.outer_html(selector, index)?))
            }),
            dom_op("value", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.value(selector, index)?))
            }),
            dom_op("set_value", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_value(selector, index, arg_str(args, 2, "value")?)?;
                Ok(Value::Null)
            }),
            dom_op("attribute", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.attribute(selector, index, arg_str(args, 2, "name")?)?))
            }),
            dom_op("set_attribute", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_attribute(
                    selector,
                    index,
                    arg_str(args, 2, "name")?,
                    arg_str(args, 3, "value")?,
                )?;
                Ok(Value::Null)
            }),
            dom_op("remove_attribute", |d, _, args| {
                let (selector, index) = target(args)?;
                d.remove_attribute(selector, index, arg_str(args, 2, "name")?)?;
                Ok(Value::Null)
            }),
            dom_op("is_checked", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(json!(d.is_checked(selector, index)?))
            }),
            dom_op("set_checked", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_checked(selector, index, arg_bool(args, 2, "checked")?)?;
                Ok(Value::Null)
            }),
            dom_op("scroll_to", |d, _, args| {
                let (selector, index) = target(args)?;
                let x = arg_i64(args, 2, "x")? as i32;
                let y = arg_i64(args, 3, "y")? as i32;
                d.scroll_to(selector, index, x, y)?;
                Ok(Value::Null)
            }),
            dom_op("set_focus", |d, _, args| {
                let (selector, index) = target(args)?;
                d.set_focus(selector, index, arg_bool(args, 2, "focused")?)?;
                Ok(Value::Null)
            }),
            dom_op("canvas_png", |d, _, args| {
                let (selector, index) = target(args)?;
                Ok(encode_base64(&d.canvas_png(selector, index)?))
            }),
            dom_op("document_node", |d, _, _| Ok(json!(d.document_node()?))),
            dom_op("query_selector", |d, _, args| {
                let node = arg_i64(args, 0, "node")?;
                Ok(json!(d.query_selector(node, arg_str(args, 1, "selector")?)?))
            }),
            dom_op("query_selector_all", |d, _, args| {
                let node = arg_i64(args, 0, "node")?;
                Ok(json!(d.query_selector_all(node, arg_str(args, 1, "selector")?)?))
            }),
        ],
    )
}

fn extension_table() -> OpTable {
    OpTable::new(
        Category::Extension,
        vec![
            extension_op("id", |e, _, _| Ok(json!(e.id()))),
            extension_op("name", |e, _, _| Ok(json!(e.name()))),
            extension_op("is_enabled", |e, _, _| Ok(json!(e.is_enabled()?))),
            extension_op("set_enabled", |e, _, args| {
                e.set_enabled(arg_bool(args, 0, "enabled")?)?;
                Ok(Value::Null)
            }),
            extension_op("remove", |e, _, _| {
                e.remove()?;
                Ok(Value::Null)
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_element_target_arguments() {
        let args = [json!("#name"), json!(2)];
        assert_eq!(target(&args).unwrap(), ("#name", 2));
        assert!(matches!(
            target(&[json!("#name")]),
            Err(BridgeError::InvalidArgument(_))
        ));
    }
}
