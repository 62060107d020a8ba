//! Drives the runtime through its C entry points the way a foreign host would

use parking_lot::Mutex;
use serde_json::Value;
use std::ffi::{CStr, CString, c_char, c_void};
use std::time::{Duration, Instant};
use viewbridge_runtime::abi::*;
use viewbridge_runtime::headless::drive;
use viewbridge_runtime::{Browser, Category, Environment, EnvironmentState, EventKind, HandleId};

type Received = Mutex<Vec<(u32, HandleId, Value)>>;

unsafe extern "C" fn record_event(
    user_data: *mut c_void,
    event_id: u32,
    browser: HandleId,
    payload_json: *const c_char,
) -> bool {
    let received = unsafe { &*(user_data as *const Received) };
    let payload = unsafe { CStr::from_ptr(payload_json) }
        .to_str()
        .ok()
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or(Value::Null);
    received.lock().push((event_id, browser, payload));
    false
}

/// Read a returned string and give the block back
fn take_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
    assert!(unsafe { viewbridge_mem_free(ptr as *mut c_void) });
    Some(text)
}

fn invoke(ctx: *const AbiContext, id: HandleId, category: Category, op: &str, args: &str) -> Value {
    let op = CString::new(op).unwrap();
    let args = CString::new(args).unwrap();
    let raw = unsafe { viewbridge_invoke_named(ctx, id, category.as_raw(), op.as_ptr(), args.as_ptr()) };
    serde_json::from_str(&take_string(raw).unwrap()).unwrap()
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_foreign_host_session() {
    let received: Box<Received> = Box::default();
    let options = CString::new(r#"{"additional_arguments": "--headless", "owner_thread_name": "abi-owner"}"#).unwrap();
    let mut ctx: *mut AbiContext = std::ptr::null_mut();
    let mut env_id: HandleId = 0;

    let created = unsafe {
        viewbridge_environment_create(
            options.as_ptr(),
            Some(record_event),
            &*received as *const Received as *mut c_void,
            &mut ctx,
            &mut env_id,
        )
    };
    assert!(created);
    assert!(!ctx.is_null());
    let context = unsafe { &*ctx };
    assert_eq!(context.handles().category(env_id), Some(Category::Environment));
    let environment = context.handles().get::<Environment>(env_id).unwrap();

    let browser_id = invoke(ctx, env_id, Category::Environment, "create_browser", "[]")
        .as_u64()
        .unwrap() as HandleId;
    assert_eq!(context.handles().category(browser_id), Some(Category::Browser));

    assert_eq!(
        invoke(ctx, browser_id, Category::Browser, "navigate", r#"["https://example.com/"]"#),
        Value::Null
    );
    let source_index = context
        .registry()
        .table(Category::Browser)
        .and_then(|table| table.position("source_url"))
        .unwrap();
    let raw = unsafe {
        viewbridge_invoke(ctx, browser_id, Category::Browser.as_raw(), source_index as u32, std::ptr::null())
    };
    assert_eq!(take_string(raw).as_deref(), Some("\"https://example.com/\""));

    // Errors come back as null
    assert_eq!(invoke(ctx, browser_id, Category::Frame, "name", "[]"), Value::Null);
    assert_eq!(invoke(ctx, browser_id, Category::Browser, "no_such_op", "[]"), Value::Null);

    wait_until(|| {
        received
            .lock()
            .iter()
            .any(|(event, browser, _)| *event == EventKind::Created.id() && *browser == browser_id)
    });
    wait_until(|| {
        received.lock().iter().any(|(event, _, payload)| {
            *event == EventKind::TitleChanged.id() && payload["title"] == "example.com"
        })
    });

    let browser = context.handles().get::<Browser>(browser_id).unwrap();
    drive(&browser, |webview| {
        webview.attach_frame("left");
        webview.attach_frame("right");
    })
    .unwrap();
    let block = unsafe { viewbridge_frame_handles(ctx, browser_id) };
    assert!(!block.is_null());
    let ids = unsafe {
        let count = block.read();
        std::slice::from_raw_parts(block.add(1), count).to_vec()
    };
    assert!(unsafe { viewbridge_mem_free(block as *mut c_void) });
    assert_eq!(ids.len(), 2);
    let right = ids[1] as HandleId;
    assert_eq!(invoke(ctx, right, Category::Frame, "name", "[]"), "right");

    let before = context.handles().ref_count(right);
    unsafe { viewbridge_add_ref(ctx, right, Category::Frame.as_raw()) };
    assert_eq!(context.handles().ref_count(right), before + 1);
    unsafe { viewbridge_release(ctx, right, Category::Frame.as_raw()) };
    unsafe { viewbridge_release(ctx, right, Category::Browser.as_raw()) };
    assert_eq!(context.handles().ref_count(right), before);

    unsafe { viewbridge_context_destroy(ctx) };
    assert_eq!(environment.state(), EnvironmentState::TornDown);
    assert!(browser.is_destroyed());
}

#[test]
fn test_environment_create_rejects_bad_options() {
    let options = CString::new("{ not json").unwrap();
    let mut ctx: *mut AbiContext = std::ptr::null_mut();
    let created = unsafe {
        viewbridge_environment_create(
            options.as_ptr(),
            None,
            std::ptr::null_mut(),
            &mut ctx,
            std::ptr::null_mut(),
        )
    };
    assert!(!created);
    assert!(ctx.is_null());
}

#[test]
fn test_op_counts_match_registry() {
    let options = CString::new("{}").unwrap();
    let mut ctx: *mut AbiContext = std::ptr::null_mut();
    let created = unsafe {
        viewbridge_environment_create(
            options.as_ptr(),
            None,
            std::ptr::null_mut(),
            &mut ctx,
            std::ptr::null_mut(),
        )
    };
    assert!(created);

    let registry = unsafe { &*ctx }.registry();
    for raw in 0..=16 {
        let category = Category::from_raw(raw).unwrap();
        assert_eq!(
            unsafe { viewbridge_op_count(ctx, raw) } as usize,
            registry.op_count(category)
        );
    }
    assert_eq!(unsafe { viewbridge_op_count(ctx, 17) }, 0);
    assert_eq!(unsafe { viewbridge_op_count(std::ptr::null(), Category::Browser.as_raw()) }, 0);
    unsafe { viewbridge_context_destroy(ctx) };
}

#[test]
fn test_check_runtime() {
    let empty = CString::new("").unwrap();
    let version = take_string(unsafe { viewbridge_check_runtime(empty.as_ptr()) }).unwrap();
    assert!(!version.is_empty());

    let install = std::env::temp_dir().join(format!("viewbridge-install-{}", std::process::id()));
    std::fs::create_dir_all(&install).unwrap();
    let dir = CString::new(install.to_string_lossy().as_ref()).unwrap();
    // A bare directory is not a runtime
    assert!(take_string(unsafe { viewbridge_check_runtime(dir.as_ptr()) }).is_none());

    std::fs::write(install.join(RUNTIME_MARKER), r#"{"version": "121.0.2277.86"}"#).unwrap();
    assert_eq!(
        take_string(unsafe { viewbridge_check_runtime(dir.as_ptr()) }).as_deref(),
        Some("121.0.2277.86")
    );
    std::fs::remove_dir_all(&install).unwrap();

    let missing = CString::new("/definitely/not/a/runtime").unwrap();
    assert!(take_string(unsafe { viewbridge_check_runtime(missing.as_ptr()) }).is_none());
}
