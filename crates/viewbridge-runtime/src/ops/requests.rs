//! Operations on engine-initiated requests and the menu and download entities they
//! hand out

use super::{
    OpContext, OpDecl, OpResult, OpTable, arg_bool, arg_handle, arg_i64, arg_json, arg_opt_json,
    arg_opt_str, arg_str, arg_u32, decode_base64, encode_base64, op,
};
use crate::browser::Browser;
use crate::deferred::{
    BasicAuthRequest, ContextMenuRequest, DownloadOperation, DownloadRequest, MenuCollection,
    MenuItem, NewWindowRequest, PermissionRequest, RequestIntercept, RequestOverrides,
    ResponseIntercept, ResponseOverrides, ScriptDialogRequest,
};
use crate::engine::{MenuItemKind, PermissionState};
use crate::handles::{Category, Exportable};
use serde_json::{Value, json};
use std::sync::Arc;

/// Operation on entities of type `T`, with the closure signature spelled out once
fn on<T, F>(name: &'static str, f: F) -> OpDecl
where
    T: Exportable,
    F: Fn(&Arc<T>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    op(name, f)
}

fn done() -> OpResult {
    Ok(Value::Null)
}

pub(super) fn tables() -> Vec<OpTable> {
    vec![
        new_window_table(),
        script_dialog_table(),
        permission_table(),
        context_menu_table(),
        menu_collection_table(),
        menu_item_table(),
        basic_auth_table(),
        download_operation_table(),
        download_confirm_table(),
        request_intercept_table(),
        response_intercept_table(),
    ]
}

fn new_window_table() -> OpTable {
    OpTable::new(
        Category::NewWindow,
        vec![
            on("uri", |r: &Arc<NewWindowRequest>, _, _| Ok(json!(r.uri()?))),
            on("is_user_gesture", |r: &Arc<NewWindowRequest>, _, _| {
                Ok(json!(r.is_user_gesture()?))
            }),
            on("window_features", |r: &Arc<NewWindowRequest>, _, _| {
                Ok(json!(r.window_features()?))
            }),
            on("set_new_window", |r: &Arc<NewWindowRequest>, ctx, args| {
                let target: Arc<Browser> = ctx.resolve(arg_handle(args, 0, "browser")?)?;
                r.set_new_window(&target)?;
                done()
            }),
            on("set_handled", |r: &Arc<NewWindowRequest>, _, args| {
                r.set_handled(arg_bool(args, 0, "handled")?)?;
                done()
            }),
        ],
    )
}

fn script_dialog_table() -> OpTable {
    OpTable::new(
        Category::ScriptDialog,
        vec![
            on("url", |r: &Arc<ScriptDialogRequest>, _, _| Ok(json!(r.url()))),
            on("kind", |r: &Arc<ScriptDialogRequest>, _, _| Ok(json!(r.kind()))),
            on("message", |r: &Arc<ScriptDialogRequest>, _, _| Ok(json!(r.message()))),
            on("default_text", |r: &Arc<ScriptDialogRequest>, _, _| {
                Ok(json!(r.default_text()))
            }),
            on("accept", |r: &Arc<ScriptDialogRequest>, _, _| {
                r.accept()?;
                done()
            }),
            on("set_input", |r: &Arc<ScriptDialogRequest>, _, args| {
                r.set_input(arg_str(args, 0, "text")?)?;
                done()
            }),
            on("process", |r: &Arc<ScriptDialogRequest>, _, _| {
                r.process()?;
                done()
            }),
        ],
    )
}

fn permission_table() -> OpTable {
    OpTable::new(
        Category::Permission,
        vec![
            on("url", |r: &Arc<PermissionRequest>, _, _| Ok(json!(r.url()))),
            on("kind", |r: &Arc<PermissionRequest>, _, _| Ok(json!(r.kind()))),
            on("is_user_gesture", |r: &Arc<PermissionRequest>, _, _| {
                Ok(json!(r.is_user_gesture()))
            }),
            on("set_state", |r: &Arc<PermissionRequest>, _, args| {
                let state: PermissionState = arg_json(args, 0, "state")?;
                r.set_state(state)?;
                done()
            }),
            on("process", |r: &Arc<PermissionRequest>, _, args| {
                r.process(arg_bool(args, 0, "handled")?)?;
                done()
            }),
        ],
    )
}

fn context_menu_table() -> OpTable {
    OpTable::new(
        Category::ContextMenuParams,
        vec![
            on("target", |r: &Arc<ContextMenuRequest>, _, _| Ok(json!(r.target()?))),
            on("location", |r: &Arc<ContextMenuRequest>, _, _| {
                let (x, y) = r.location()?;
                Ok(json!([x, y]))
            }),
            on("set_selected_command", |r: &Arc<ContextMenuRequest>, _, args| {
                r.set_selected_command(arg_i64(args, 0, "command_id")? as i32)?;
                done()
            }),
            on("menu_items", |r: &Arc<ContextMenuRequest>, ctx, _| {
                Ok(ctx.export(r.menu_items()?))
            }),
            on("create_item", |r: &Arc<ContextMenuRequest>, ctx, args| {
                let label = arg_str(args, 0, "label")?;
                let icon = match arg_opt_str(args, 1, "icon")? {
                    Some(_) => Some(decode_base64(args, 1, "icon")?),
                    None => None,
                };
                let kind: MenuItemKind =
                    arg_opt_json(args, 2, "kind")?.unwrap_or(MenuItemKind::Command);
                Ok(ctx.export(r.create_item(label, icon, kind)?))
            }),
            on("process", |r: &Arc<ContextMenuRequest>, _, args| {
                r.process(arg_bool(args, 0, "handled")?)?;
                done()
            }),
        ],
    )
}

fn menu_collection_table() -> OpTable {
    OpTable::new(
        Category::ContextMenuCollection,
        vec![
            on("len", |c: &Arc<MenuCollection>, _, _| Ok(json!(c.len()?))),
            on("get", |c: &Arc<MenuCollection>, ctx, args| {
                Ok(ctx.export(c.get(arg_u32(args, 0, "index")? as usize)?))
            }),
            on("remove", |c: &Arc<MenuCollection>, _, args| {
                c.remove(arg_u32(args, 0, "index")? as usize)?;
                done()
            }),
            on("insert", |c: &Arc<MenuCollection>, ctx, args| {
                let item: Arc<MenuItem> = ctx.resolve(arg_handle(args, 1, "item")?)?;
                c.insert(arg_u32(args, 0, "index")? as usize, &item)?;
                done()
            }),
        ],
    )
}

fn menu_item_table() -> OpTable {
    OpTable::new(
        Category::ContextMenuItem,
        vec![
            on("name", |i: &Arc<MenuItem>, _, _| Ok(json!(i.name()?))),
            on("label", |i: &Arc<MenuItem>, _, _| Ok(json!(i.label()?))),
            on("command_id", |i: &Arc<MenuItem>, _, _| Ok(json!(i.command_id()?))),
            on("shortcut", |i: &Arc<MenuItem>, _, _| Ok(json!(i.shortcut()?))),
            on("icon", |i: &Arc<MenuItem>, _, _| {
                Ok(i.icon()?.map_or(Value::Null, |bytes| encode_base64(&bytes)))
            }),
            on("kind", |i: &Arc<MenuItem>, _, _| Ok(json!(i.kind()?))),
            on("children", |i: &Arc<MenuItem>, ctx, _| Ok(ctx.export_opt(i.children()?))),
            on("is_enabled", |i: &Arc<MenuItem>, _, _| Ok(json!(i.is_enabled()?))),
            on("set_enabled", |i: &Arc<MenuItem>, _, args| {
                i.set_enabled(arg_bool(args, 0, "enabled")?)?;
                done()
            }),
            on("is_checked", |i: &Arc<MenuItem>, _, _| Ok(json!(i.is_checked()?))),
            on("set_checked", |i: &Arc<MenuItem>, _, args| {
                i.set_checked(arg_bool(args, 0, "checked")?)?;
                done()
            }),
        ],
    )
}

fn basic_auth_table() -> OpTable {
    OpTable::new(
        Category::BasicAuth,
        vec![
            on("uri", |r: &Arc<BasicAuthRequest>, _, _| Ok(json!(r.uri()))),
            on("challenge", |r: &Arc<BasicAuthRequest>, _, _| Ok(json!(r.challenge()))),
            on("set_credentials", |r: &Arc<BasicAuthRequest>, _, args| {
                r.set_credentials(arg_str(args, 0, "user")?, arg_str(args, 1, "password")?)?;
                done()
            }),
            on("cancel", |r: &Arc<BasicAuthRequest>, _, _| {
                r.cancel()?;
                done()
            }),
        ],
    )
}

fn download_operation_table() -> OpTable {
    OpTable::new(
        Category::DownloadOperation,
        vec![
            on("uri", |d: &Arc<DownloadOperation>, _, _| Ok(json!(d.uri()?))),
            on("result_path", |d: &Arc<DownloadOperation>, _, _| {
                Ok(json!(d.result_path()?))
            }),
            on("mime_type", |d: &Arc<DownloadOperation>, _, _| Ok(json!(d.mime_type()?))),
            on("content_disposition", |d: &Arc<DownloadOperation>, _, _| {
                Ok(json!(d.content_disposition()?))
            }),
            on("total_bytes", |d: &Arc<DownloadOperation>, _, _| {
                Ok(json!(d.total_bytes()?))
            }),
            on("received_bytes", |d: &Arc<DownloadOperation>, _, _| {
                Ok(json!(d.received_bytes()?))
            }),
            on("estimated_end_time", |d: &Arc<DownloadOperation>, _, _| {
                Ok(json!(d.estimated_end_time()?))
            }),
            on("state", |d: &Arc<DownloadOperation>, _, _| Ok(json!(d.state()?))),
            on("can_resume", |d: &Arc<DownloadOperation>, _, _| Ok(json!(d.can_resume()?))),
            on("cancel", |d: &Arc<DownloadOperation>, _, _| {
                d.cancel()?;
                done()
            }),
            on("pause", |d: &Arc<DownloadOperation>, _, _| {
                d.pause()?;
                done()
            }),
            on("resume", |d: &Arc<DownloadOperation>, _, _| {
                d.resume()?;
                done()
            }),
        ],
    )
}

fn download_confirm_table() -> OpTable {
    OpTable::new(
        Category::DownloadConfirm,
        vec![
            on("operation", |r: &Arc<DownloadRequest>, ctx, _| {
                Ok(ctx.export(r.operation()?))
            }),
            on("result_path", |r: &Arc<DownloadRequest>, _, _| Ok(json!(r.result_path()?))),
            on("set_cancel", |r: &Arc<DownloadRequest>, _, args| {
                r.set_cancel(arg_bool(args, 0, "cancel")?)?;
                done()
            }),
            on("set_result_path", |r: &Arc<DownloadRequest>, _, args| {
                r.set_result_path(arg_str(args, 0, "path")?)?;
                done()
            }),
            on("handle", |r: &Arc<DownloadRequest>, _, args| {
                r.handle(arg_bool(args, 0, "handled")?)?;
                done()
            }),
        ],
    )
}

fn request_intercept_table() -> OpTable {
    OpTable::new(
        Category::RequestIntercept,
        vec![
            on("request", |r: &Arc<RequestIntercept>, _, _| Ok(json!(r.request()))),
            on("continue", |r: &Arc<RequestIntercept>, _, args| {
                let overrides: Option<RequestOverrides> = arg_opt_json(args, 0, "overrides")?;
                r.continue_request(overrides)?;
                done()
            }),
            on("fail", |r: &Arc<RequestIntercept>, _, args| {
                r.fail(arg_str(args, 0, "reason")?)?;
                done()
            }),
            on("fulfill", |r: &Arc<RequestIntercept>, _, args| {
                let response: ResponseOverrides = arg_json(args, 0, "response")?;
                r.fulfill(response, &decode_base64(args, 1, "body")?)?;
                done()
            }),
        ],
    )
}

fn response_intercept_table() -> OpTable {
    OpTable::new(
        Category::ResponseIntercept,
        vec![
            on("request", |r: &Arc<ResponseIntercept>, _, _| Ok(json!(r.request()))),
            on("status_code", |r: &Arc<ResponseIntercept>, _, _| Ok(json!(r.status_code()))),
            on("status_text", |r: &Arc<ResponseIntercept>, _, _| Ok(json!(r.status_text()))),
            on("headers", |r: &Arc<ResponseIntercept>, _, _| Ok(json!(r.headers()))),
            on("body", |r: &Arc<ResponseIntercept>, _, _| Ok(encode_base64(&r.body()?))),
            on("continue", |r: &Arc<ResponseIntercept>, _, args| {
                let overrides: Option<ResponseOverrides> = arg_opt_json(args, 0, "overrides")?;
                r.continue_response(overrides)?;
                done()
            }),
            on("fulfill", |r: &Arc<ResponseIntercept>, _, args| {
                let overrides: Option<ResponseOverrides> = arg_opt_json(args, 0, "overrides")?;
                r.fulfill(overrides, &decode_base64(args, 1, "body")?)?;
                done()
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tables_match_their_categories() {
        let categories: Vec<_> = tables().iter().map(OpTable::category).collect();
        assert_eq!(categories.len(), 11);
        assert!(categories.contains(&Category::NewWindow));
        assert!(categories.contains(&Category::ResponseIntercept));
        assert!(!categories.contains(&Category::Browser));
    }

    #[test]
    fn test_resolving_ops_come_last_in_dialog_table() {
        let table = script_dialog_table();
        assert_eq!(table.position("process"), Some(table.len() - 1));
        assert_eq!(table.position("url"), Some(0));
    }
}
