//! Environment, browser and frame operations

use super::{
    OpContext, OpDecl, OpResult, OpTable, arg_bool, arg_f64, arg_json, arg_opt_bool,
    arg_opt_json, arg_str, arg_u32, op,
};
use crate::browser::Browser;
use crate::config::{BrowserOptions, BrowserSettings};
use crate::engine::HostResourceAccess;
use crate::environment::Environment;
use crate::frame::Frame;
use crate::handles::Category;
use serde_json::{Value, json};
use std::sync::Arc;

/// Script and protocol results are JSON text; anything else is passed through as a string
fn json_result(raw: String) -> Value {
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw),
    }
}

fn environment_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<Environment>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

fn browser_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<Browser>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

fn frame_op<F>(name: &'static str, f: F) -> OpDecl
where
    F: Fn(&Arc<Frame>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

pub(super) fn tables() -> Vec<OpTable> {
    vec![environment_table(), browser_table(), frame_table()]
}

fn environment_table() -> OpTable {
    OpTable::new(
        Category::Environment,
        vec![
            environment_op("create_browser", |env, ctx, args| {
                let options: BrowserOptions = arg_opt_json(args, 0, "options")?.unwrap_or_default();
                let browser = env.create_browser(options, ctx.event_handler())?;
                Ok(ctx.export(browser))
            }),
            environment_op("runtime_version", |env, _, _| {
                Ok(Value::String(env.runtime_version()?))
            }),
            environment_op("process_infos", |env, _, _| {
                Ok(Value::String(env.process_infos_string()?))
            }),
            environment_op("browser_count", |env, _, _| {
                Ok(json!(env.browser_count()))
            }),
            environment_op("state", |env, _, _| Ok(json!(env.state()))),
            environment_op("shutdown", |env, _, _| {
                env.shutdown()?;
                Ok(Value::Null)
            }),
        ],
    )
}

fn browser_table() -> OpTable {
    OpTable::new(
        Category::Browser,
        vec![
            browser_op("navigate", |b, _, args| {
                b.navigate(arg_str(args, 0, "url")?)?;
                Ok(Value::Null)
            }),
            browser_op("can_go_back", |b, _, _| Ok(json!(b.can_go_back()?))),
            browser_op("can_go_forward", |b, _, _| Ok(json!(b.can_go_forward()?))),
            browser_op("go_back", |b, _, _| Ok(json!(b.go_back()?))),
            browser_op("go_forward", |b, _, _| Ok(json!(b.go_forward()?))),
            browser_op("reload", |b, _, _| Ok(json!(b.reload()?))),
            browser_op("stop", |b, _, _| Ok(json!(b.stop()?))),
            browser_op("source_url", |b, _, _| Ok(json!(b.source_url()?))),
            browser_op("title", |b, _, _| Ok(json!(b.title()?))),
            browser_op("settings", |b, _, _| Ok(json!(b.settings()?))),
            browser_op("set_settings", |b, _, args| {
                let settings: BrowserSettings = arg_json(args, 0, "settings")?;
                b.set_settings(settings)?;
                Ok(Value::Null)
            }),
            browser_op("execute_script", |b, _, args| {
                Ok(json_result(b.execute_script(arg_str(args, 0, "script")?)?))
            }),
            browser_op("call_protocol_method", |b, _, args| {
                let params = args.get(1).map_or_else(|| "{}".to_string(), |params| match params {
                    Value::String(text) => text.clone(),
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                });
                Ok(json_result(b.call_protocol_method(arg_str(args, 0, "method")?, &params)?))
            }),
            browser_op("zoom_factor", |b, _, _| Ok(json!(b.zoom_factor()?))),
            browser_op("set_zoom_factor", |b, _, args| {
                b.set_zoom_factor(arg_f64(args, 0, "factor")?)?;
                Ok(Value::Null)
            }),
            browser_op("is_muted", |b, _, _| Ok(json!(b.is_muted()?))),
            browser_op("set_muted", |b, _, args| {
                b.set_muted(arg_bool(args, 0, "muted")?)?;
                Ok(Value::Null)
            }),
            browser_op("suspend", |b, _, _| Ok(json!(b.suspend()?))),
            browser_op("resume", |b, _, _| Ok(json!(b.resume()?))),
            browser_op("is_suspended", |b, _, _| Ok(json!(b.is_suspended()?))),
            browser_op("user_agent", |b, _, _| Ok(json!(b.user_agent()?))),
            browser_op("set_user_agent", |b, _, args| {
                b.set_user_agent(arg_str(args, 0, "user_agent")?)?;
                Ok(Value::Null)
            }),
            browser_op("add_init_script", |b, _, args| {
                Ok(json!(b.add_init_script(arg_str(args, 0, "script")?)?))
            }),
            browser_op("remove_init_script", |b, _, args| {
                b.remove_init_script(arg_str(args, 0, "id")?)?;
                Ok(Value::Null)
            }),
            browser_op("post_web_message", |b, _, args| {
                let as_json = arg_opt_bool(args, 1, "as_json")?.unwrap_or(false);
                b.post_web_message(arg_str(args, 0, "message")?, as_json)?;
                Ok(Value::Null)
            }),
            browser_op("set_virtual_host_mapping", |b, _, args| {
                let access: HostResourceAccess =
                    arg_opt_json(args, 2, "access")?.unwrap_or_default();
                b.set_virtual_host_mapping(
                    arg_str(args, 0, "host")?,
                    arg_str(args, 1, "folder")?,
                    access,
                )?;
                Ok(Value::Null)
            }),
            browser_op("clear_virtual_host_mapping", |b, _, args| {
                b.clear_virtual_host_mapping(arg_str(args, 0, "host")?)?;
                Ok(Value::Null)
            }),
            browser_op("set_background_color", |b, _, args| {
                b.set_background_color(arg_u32(args, 0, "argb")?)?;
                Ok(Value::Null)
            }),
            browser_op("set_request_interception", |b, _, args| {
                b.set_request_interception(arg_bool(args, 0, "enabled")?)?;
                Ok(Value::Null)
            }),
            browser_op("frame_count", |b, _, _| Ok(json!(b.frame_count()))),
            browser_op("frame_at", |b, ctx, args| {
                let index = arg_u32(args, 0, "index")? as usize;
                Ok(ctx.export_opt(b.frame_at(index)))
            }),
            browser_op("cookie_manager", |b, ctx, _| Ok(ctx.export(b.cookie_manager()?))),
            browser_op("dom", |b, ctx, _| Ok(ctx.export(b.dom()?))),
            browser_op("load_extension", |b, ctx, args| {
                Ok(ctx.export(b.load_extension(arg_str(args, 0, "path")?)?))
            }),
            browser_op("profile_name", |b, _, _| Ok(json!(b.profile_name()?))),
            browser_op("state", |b, _, _| Ok(json!(b.state()))),
            browser_op("close", |b, _, _| Ok(json!(b.close()?))),
            browser_op("destroy", |b, _, _| {
                b.destroy();
                Ok(Value::Null)
            }),
        ],
    )
}

fn frame_table() -> OpTable {
    OpTable::new(
        Category::Frame,
        vec![
            frame_op("id", |f, _, _| Ok(json!(f.id()))),
            frame_op("name", |f, _, _| Ok(json!(f.name()?))),
            frame_op("url", |f, _, _| Ok(json!(f.url()))),
            frame_op("execute_script", |f, _, args| {
                Ok(json_result(f.execute_script(arg_str(args, 0, "script")?)?))
            }),
            frame_op("post_web_message", |f, _, args| {
                let as_json = arg_opt_bool(args, 1, "as_json")?.unwrap_or(false);
                f.post_web_message(arg_str(args, 0, "message")?, as_json)?;
                Ok(Value::Null)
            }),
            frame_op("state", |f, _, _| Ok(json!(f.state()))),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_result() {
        assert_eq!(json_result("42".to_string()), json!(42));
        assert_eq!(json_result("\"hi\"".to_string()), json!("hi"));
        assert_eq!(json_result("init-3".to_string()), json!("init-3"));
    }
}
