//! C ABI
//!
//! Foreign callers hold a [`AbiContext`] per environment and address every entity by
//! handle id and [`Category`]. Operations are invoked through the [`OpRegistry`] with
//! JSON arguments; results come back as NUL-terminated JSON strings allocated with
//! [`viewbridge_mem_alloc`] and freed with [`viewbridge_mem_free`].
//!
//! Errors never cross the boundary. Every entry point logs the failure with `warn!`
//! and returns a default (`false`, null, `0` or the string `"null"`).
//!
//! Events reach the caller through one callback per environment:
//!
//! ```text
//! callback(user_data, event_id, browser_handle, payload_json) -> bool
//! ```
//!
//! Handles inside the payload are exported for the callee, which owns one reference
//! to each. The return value only matters for inline events.

use crate::browser::Browser;
use crate::config::EnvironmentOptions;
use crate::engine::{KeyEvent, NavigationStarting};
use crate::environment::Environment;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BrowserEvent, BrowserEventHandler, EventKind};
use crate::handles::{Category, ExportedObject, HandleId, HandleTable};
use crate::headless::HEADLESS_VERSION;
use crate::ops::{OpContext, OpRegistry};
use serde::Deserialize;
use serde_json::{Value, json};
use std::alloc::{Layout, alloc, dealloc};
use std::ffi::{CStr, CString, c_char, c_void};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Event callback registered at environment creation
pub type EventCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    event_id: u32,
    browser: HandleId,
    payload_json: *const c_char,
) -> bool;

/// File that marks a directory as a runtime install; holds `{"version": "..."}`
pub const RUNTIME_MARKER: &str = "viewbridge-runtime.json";

/// Per-environment state owned by the foreign caller
pub struct AbiContext {
    handles: Arc<HandleTable>,
    registry: OpRegistry,
    ops: OpContext,
}

impl AbiContext {
    fn new(callback: Option<EventCallback>, user_data: *mut c_void) -> Self {
        let handles = Arc::new(HandleTable::new());
        let mut ops = OpContext::new(handles.clone());
        if let Some(callback) = callback {
            ops = ops.with_event_handler(Arc::new(AbiEventHandler {
                handles: Arc::downgrade(&handles),
                callback,
                user_data: user_data as usize,
            }));
        }
        Self {
            handles,
            registry: OpRegistry::standard(),
            ops,
        }
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// Operation tables this context dispatches through
    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for AbiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbiContext")
            .field("handles", &self.handles)
            .finish()
    }
}

/// Forwards browser events to the foreign callback
struct AbiEventHandler {
    handles: Weak<HandleTable>,
    callback: EventCallback,
    /// Opaque caller pointer, passed back untouched
    user_data: usize,
}

impl AbiEventHandler {
    fn deliver(&self, browser: &Arc<Browser>, kind: EventKind, payload: impl FnOnce(&HandleTable) -> Value) -> bool {
        let Some(handles) = self.handles.upgrade() else {
            debug!(event = ?kind, "Event after context was destroyed");
            return false;
        };
        let browser_id = handles.export(browser.clone());
        let payload = payload(&handles);
        let Ok(text) = CString::new(payload.to_string()) else {
            warn!(event = ?kind, "Event payload contains a NUL byte");
            return false;
        };
        // SAFETY: the caller registered `callback` for exactly this signature and
        // promised `user_data` outlives the context.
        unsafe {
            (self.callback)(
                self.user_data as *mut c_void,
                kind.id(),
                browser_id,
                text.as_ptr(),
            )
        }
    }
}

fn event_payload(handles: &HandleTable, event: BrowserEvent) -> Value {
    match event {
        BrowserEvent::Created | BrowserEvent::CloseRequested | BrowserEvent::HistoryChanged => {
            Value::Null
        }
        BrowserEvent::NewWindowRequested(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::TitleChanged(title) => json!({ "title": title }),
        BrowserEvent::FullscreenChanged(fullscreen) => json!({ "fullscreen": fullscreen }),
        BrowserEvent::ContentLoading {
            is_error_page,
            navigation_id,
        } => json!({ "is_error_page": is_error_page, "navigation_id": navigation_id }),
        BrowserEvent::SourceChanged { is_new_document } => {
            json!({ "is_new_document": is_new_document })
        }
        BrowserEvent::NavigationCompleted {
            success,
            http_status,
            navigation_id,
        } => json!({
            "success": success,
            "http_status": http_status,
            "navigation_id": navigation_id,
        }),
        BrowserEvent::ScriptDialog(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::ContextMenuRequested(request) => {
            json!({ "request": handles.export(request) })
        }
        BrowserEvent::ContextMenuItemSelected(item) => json!({ "item": handles.export(item) }),
        BrowserEvent::PermissionRequested(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::RequestIntercepted(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::ResponseIntercepted(request) => {
            json!({ "request": handles.export(request) })
        }
        BrowserEvent::BasicAuthRequested(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::WebMessageReceived {
            frame,
            source,
            message,
        } => json!({
            "frame": frame.map(|frame| handles.export(frame)),
            "source": source,
            "message": message,
        }),
        BrowserEvent::FileChooserRequested(chooser) => json!(chooser),
        BrowserEvent::ConsoleMessage(message) => json!(message),
        BrowserEvent::DownloadStarting(request) => json!({ "request": handles.export(request) }),
        BrowserEvent::FaviconChanged(uri) => json!({ "uri": uri }),
        BrowserEvent::AudioStateChanged(playing) => json!({ "playing": playing }),
        BrowserEvent::StatusTextChanged(text) => json!({ "text": text }),
    }
}

impl BrowserEventHandler for AbiEventHandler {
    fn on_event(&self, browser: &Arc<Browser>, event: BrowserEvent) {
        let kind = event.kind();
        self.deliver(browser, kind, |handles| event_payload(handles, event));
    }

    fn on_navigation_starting(&self, browser: &Arc<Browser>, navigation: &NavigationStarting) -> bool {
        self.deliver(browser, EventKind::NavigationStarting, |_| json!(navigation))
    }

    fn on_key_event(&self, browser: &Arc<Browser>, key: &KeyEvent) -> bool {
        self.deliver(browser, EventKind::KeyEvent, |_| json!(key))
    }
}

// Allocation header: the block size is stored in front of the returned pointer so
// `viewbridge_mem_free` can rebuild the layout.
const HEADER: usize = 16;

fn allocate(size: usize) -> *mut u8 {
    let Some(total) = size.checked_add(HEADER) else {
        return std::ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, HEADER) else {
        return std::ptr::null_mut();
    };
    // SAFETY: `layout` has a non-zero size.
    unsafe {
        let base = alloc(layout);
        if base.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        (base as *mut usize).write(total);
        base.add(HEADER)
    }
}

/// Copy `text` into a NUL-terminated block from [`viewbridge_mem_alloc`]
fn alloc_string(text: &str) -> *mut c_char {
    let bytes = text.as_bytes();
    let block = allocate(bytes.len() + 1);
    if block.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: `block` holds `len + 1` writable bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), block, bytes.len());
        block.add(bytes.len()).write(0);
    }
    block as *mut c_char
}

/// Borrow a C string; null reads as empty
///
/// # Safety
/// `text` must be null or a valid NUL-terminated string.
unsafe fn read_str<'a>(text: *const c_char) -> BridgeResult<&'a str> {
    if text.is_null() {
        return Ok("");
    }
    // SAFETY: guaranteed by the caller.
    unsafe { CStr::from_ptr(text) }
        .to_str()
        .map_err(|e| BridgeError::invalid_argument(format!("string is not UTF-8: {}", e)))
}

/// Arguments arrive as a JSON array; null, empty and a lone value are accepted too
fn parse_args(raw: &str) -> BridgeResult<Vec<Value>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str(raw)? {
        Value::Array(args) => Ok(args),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![single]),
    }
}

fn category(raw: u32) -> BridgeResult<Category> {
    Category::from_raw(raw)
        .ok_or_else(|| BridgeError::invalid_argument(format!("unknown category {}", raw)))
}

/// Borrow the context behind `ctx`
///
/// # Safety
/// `ctx` must be null or a live pointer from [`viewbridge_environment_create`].
unsafe fn context<'a>(ctx: *const AbiContext) -> BridgeResult<&'a AbiContext> {
    // SAFETY: guaranteed by the caller.
    unsafe { ctx.as_ref() }.ok_or_else(|| BridgeError::invalid_argument("null context"))
}

fn result_string(what: &str, result: BridgeResult<Value>) -> *mut c_char {
    match result {
        Ok(value) => alloc_string(&value.to_string()),
        Err(e) => {
            warn!(call = what, error = %e, "ABI call failed");
            alloc_string("null")
        }
    }
}

fn create_environment(options_json: &str) -> BridgeResult<Arc<Environment>> {
    let options = EnvironmentOptions::from_json(options_json)?.with_env_overrides()?;
    Environment::builder().options(options).headless().spawn()
}

/// Create an environment and the context that exports it.
///
/// On success `*out_ctx` receives the context and `*out_env` the environment handle,
/// which the caller owns one reference to.
///
/// # Safety
/// - `options_json` must be null or a valid NUL-terminated string
/// - `out_ctx` and `out_env` must be null or valid for writes
/// - `user_data` must remain valid until the context is destroyed
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_environment_create(
    options_json: *const c_char,
    callback: Option<EventCallback>,
    user_data: *mut c_void,
    out_ctx: *mut *mut AbiContext,
    out_env: *mut HandleId,
) -> bool {
    // SAFETY: guaranteed by the caller.
    let created = unsafe { read_str(options_json) }.and_then(create_environment);
    let environment = match created {
        Ok(environment) => environment,
        Err(e) => {
            warn!(error = %e, "Environment creation failed");
            return false;
        }
    };

    let context = AbiContext::new(callback, user_data);
    let env_id = context.handles.export(environment);
    debug!(env = env_id, "Environment created for foreign caller");
    // SAFETY: both out pointers are null or writable, per the contract above.
    unsafe {
        if let Some(slot) = out_env.as_mut() {
            *slot = env_id;
        }
        match out_ctx.as_mut() {
            Some(slot) => *slot = Box::into_raw(Box::new(context)),
            None => drop(context),
        }
    }
    true
}

/// Destroy a context. Every environment it still exports is shut down.
///
/// # Safety
/// `ctx` must be null or a pointer from [`viewbridge_environment_create`] that has not
/// been destroyed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_context_destroy(ctx: *mut AbiContext) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: guaranteed by the caller.
    let context = unsafe { Box::from_raw(ctx) };
    for object in context.handles.drain() {
        if let ExportedObject::Environment(environment) = object {
            if let Err(e) = environment.shutdown() {
                warn!(error = %e, "Environment shutdown during context destroy failed");
            }
        }
    }
}

/// Take one more reference on a handle
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_add_ref(ctx: *const AbiContext, id: HandleId, category_id: u32) {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }
        .and_then(|context| context.handles.add_ref(id, category(category_id)?));
    if let Err(e) = result {
        warn!(id, category = category_id, error = %e, "add_ref failed");
    }
}

/// Drop one reference on a handle; the last one destroys the entity
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_release(ctx: *const AbiContext, id: HandleId, category_id: u32) {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }
        .and_then(|context| context.handles.release(id, category(category_id)?));
    if let Err(e) = result {
        warn!(id, category = category_id, error = %e, "release failed");
    }
}

/// Run operation `op_index` of `category` on handle `id`.
///
/// Returns a JSON string to be freed with [`viewbridge_mem_free`].
///
/// # Safety
/// - `ctx` must be null or a live context pointer
/// - `args_json` must be null or a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_invoke(
    ctx: *const AbiContext,
    id: HandleId,
    category_id: u32,
    op_index: u32,
    args_json: *const c_char,
) -> *mut c_char {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }.and_then(|context| {
        let args = parse_args(unsafe { read_str(args_json) }?)?;
        context
            .registry
            .invoke(&context.ops, id, category(category_id)?, op_index as usize, &args)
    });
    result_string("invoke", result)
}

/// Like [`viewbridge_invoke`], addressing the operation by name
///
/// # Safety
/// - `ctx` must be null or a live context pointer
/// - `op_name` and `args_json` must be null or valid NUL-terminated strings
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_invoke_named(
    ctx: *const AbiContext,
    id: HandleId,
    category_id: u32,
    op_name: *const c_char,
    args_json: *const c_char,
) -> *mut c_char {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }.and_then(|context| {
        let name = unsafe { read_str(op_name) }?;
        let args = parse_args(unsafe { read_str(args_json) }?)?;
        context
            .registry
            .invoke_named(&context.ops, id, category(category_id)?, name, &args)
    });
    result_string("invoke_named", result)
}

/// Number of operations in the table of `category`; `0` for a null context or an
/// unknown category
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_op_count(ctx: *const AbiContext, category_id: u32) -> u32 {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }.and_then(|context| {
        category(category_id).map(|category| context.registry.op_count(category) as u32)
    });
    result.unwrap_or_else(|e| {
        warn!(category = category_id, error = %e, "op_count failed");
        0
    })
}

/// Export every frame of a browser.
///
/// Returns `[count, id0, id1, ...]` as machine words, freed with
/// [`viewbridge_mem_free`]; null on failure.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_frame_handles(ctx: *const AbiContext, browser_id: HandleId) -> *mut usize {
    // SAFETY: guaranteed by the caller.
    let result = unsafe { context(ctx) }.and_then(|context| {
        let browser: Arc<Browser> = context.handles.get(browser_id)?;
        Ok(browser
            .frames()
            .into_iter()
            .map(|frame| context.handles.export(frame) as usize)
            .collect::<Vec<_>>())
    });
    let ids = match result {
        Ok(ids) => ids,
        Err(e) => {
            warn!(browser = browser_id, error = %e, "frame_handles failed");
            return std::ptr::null_mut();
        }
    };

    let words = ids.len() + 1;
    let block = allocate(words * size_of::<usize>()) as *mut usize;
    if block.is_null() {
        return block;
    }
    // SAFETY: `block` holds `words` aligned machine words.
    unsafe {
        block.write(ids.len());
        std::ptr::copy_nonoverlapping(ids.as_ptr(), block.add(1), ids.len());
    }
    block
}

#[derive(Deserialize)]
struct RuntimeMarker {
    version: String,
}

/// Version recorded by the [`RUNTIME_MARKER`] inside `dir`
fn marked_version(dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(dir.join(RUNTIME_MARKER)).ok()?;
    match serde_json::from_str::<RuntimeMarker>(&raw) {
        Ok(marker) => Some(marker.version).filter(|version| !version.is_empty()),
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Unreadable runtime marker");
            None
        }
    }
}

/// Version of the runtime found at `path`, or null when there is none.
///
/// An empty path asks for the runtime linked into this library. Any other path must
/// be a directory holding a [`RUNTIME_MARKER`] file; its `version` is returned.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_check_runtime(path: *const c_char) -> *mut c_char {
    // SAFETY: guaranteed by the caller.
    let path = match unsafe { read_str(path) } {
        Ok(path) => path,
        Err(e) => {
            warn!(error = %e, "check_runtime failed");
            return std::ptr::null_mut();
        }
    };
    if path.is_empty() {
        return alloc_string(HEADLESS_VERSION);
    }
    match marked_version(Path::new(path)) {
        Some(version) => alloc_string(&version),
        None => {
            debug!(path, "No runtime at path");
            std::ptr::null_mut()
        }
    }
}

/// Allocate `size` bytes for exchange across the boundary
#[unsafe(no_mangle)]
pub extern "C" fn viewbridge_mem_alloc(size: usize) -> *mut c_void {
    allocate(size) as *mut c_void
}

/// Free a block from [`viewbridge_mem_alloc`] or any string or array this library
/// returned. Null is ignored.
///
/// # Safety
/// `ptr` must be null or a block from this allocator that was not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn viewbridge_mem_free(ptr: *mut c_void) -> bool {
    if ptr.is_null() {
        return false;
    }
    // SAFETY: `ptr` came from `allocate`, so the header sits `HEADER` bytes before it
    // and holds the total size of a block allocated with alignment `HEADER`.
    unsafe {
        let base = (ptr as *mut u8).sub(HEADER);
        let total = (base as *const usize).read();
        dealloc(base, Layout::from_size_align_unchecked(total, HEADER));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        assert!(parse_args("").unwrap().is_empty());
        assert!(parse_args("null").unwrap().is_empty());
        assert_eq!(parse_args("[1, \"a\"]").unwrap(), vec![json!(1), json!("a")]);
        assert_eq!(parse_args("\"solo\"").unwrap(), vec![json!("solo")]);
        assert!(parse_args("[").is_err());
    }

    #[test]
    fn test_string_allocation() {
        let text = alloc_string("{\"ok\":true}");
        let read = unsafe { CStr::from_ptr(text) }.to_str().unwrap().to_string();
        assert_eq!(read, "{\"ok\":true}");
        assert!(unsafe { viewbridge_mem_free(text as *mut c_void) });
        assert!(!unsafe { viewbridge_mem_free(std::ptr::null_mut()) });
    }

    #[test]
    fn test_zero_sized_allocation() {
        let block = viewbridge_mem_alloc(0);
        assert!(!block.is_null());
        assert!(unsafe { viewbridge_mem_free(block) });
    }

    #[test]
    fn test_op_count_for_unknown_category() {
        let context = AbiContext::new(None, std::ptr::null_mut());
        unsafe {
            assert_eq!(viewbridge_op_count(&context, 999), 0);
            assert!(viewbridge_op_count(&context, Category::Browser.as_raw()) > 0);
            assert_eq!(viewbridge_op_count(std::ptr::null(), Category::Browser.as_raw()), 0);
        }
    }

    #[test]
    fn test_marked_version() {
        let dir = std::env::temp_dir().join(format!("viewbridge-marker-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(marked_version(&dir), None);

        std::fs::write(dir.join(RUNTIME_MARKER), "{ broken").unwrap();
        assert_eq!(marked_version(&dir), None);
        std::fs::write(dir.join(RUNTIME_MARKER), r#"{"version": ""}"#).unwrap();
        assert_eq!(marked_version(&dir), None);
        std::fs::write(dir.join(RUNTIME_MARKER), r#"{"version": "121.0.2277"}"#).unwrap();
        assert_eq!(marked_version(&dir).as_deref(), Some("121.0.2277"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
