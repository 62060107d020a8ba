//! Integration tests for browsers, deferred requests and exported handles

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use viewbridge_runtime::engine::{
    Cookie, DownloadState, MenuItemKind, NavigationStarting, PermissionKind, PermissionState,
    ScriptDialogKind,
};
use viewbridge_runtime::headless::{ProbeRecord, drive};
use viewbridge_runtime::ops::{OpContext, OpRegistry};
use viewbridge_runtime::prelude::*;
use viewbridge_runtime::{BrowserState, FrameState};

fn environment(name: &str) -> (Arc<Environment>, HeadlessProbe) {
    let probe = HeadlessProbe::new();
    let environment = Environment::builder()
        .headless_with(probe.clone())
        .thread_name(name)
        .call_timeout(Some(Duration::from_secs(5)))
        .spawn()
        .unwrap();
    (environment, probe)
}

fn browser_with_events(
    environment: &Arc<Environment>,
) -> (Arc<Browser>, crossbeam_channel::Receiver<BrowserEvent>) {
    let (handler, events) = ChannelHandler::new();
    let browser = environment
        .create_browser(BrowserOptions::default(), Arc::new(handler))
        .unwrap();
    (browser, events)
}

/// Next event `pick` accepts; earlier events are skipped
fn wait_for<T>(
    events: &crossbeam_channel::Receiver<BrowserEvent>,
    pick: impl Fn(BrowserEvent) -> Option<T>,
) -> T {
    loop {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .expect("event was not delivered");
        if let Some(found) = pick(event) {
            return found;
        }
    }
}

#[test]
fn test_created_event_comes_first() {
    let (environment, probe) = environment("created-owner");
    let (browser, events) = browser_with_events(&environment);

    let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.kind(), EventKind::Created);
    assert_eq!(browser.state(), BrowserState::Live);
    assert_eq!(environment.browser_count(), 1);
    assert_eq!(
        probe.count(|record| matches!(record, ProbeRecord::WebViewCreated { profile } if profile == "Default")),
        1
    );
    environment.shutdown().unwrap();
}

#[test]
fn test_new_window_request_resolves_once() {
    let (environment, probe) = environment("new-window-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_new_window("https://example.com")).unwrap();
    let request = wait_for(&events, |event| match event {
        BrowserEvent::NewWindowRequested(request) => Some(request),
        _ => None,
    });
    assert_eq!(request.uri().unwrap(), "https://example.com");

    request.set_handled(false).unwrap();
    assert!(matches!(
        request.set_handled(true),
        Err(BridgeError::AlreadyResolved)
    ));
    assert!(request.is_resolved());

    browser.bridge().flush().unwrap();
    let completions: Vec<_> = probe
        .completions()
        .into_iter()
        .filter(|(name, _)| *name == "new_window")
        .collect();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].1["handled"], json!(false));
    environment.shutdown().unwrap();
}

#[test]
fn test_script_dialog_answer_applied_before_completion() {
    let (environment, probe) = environment("dialog-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.navigate("https://example.com/form").unwrap();

    drive(&browser, |webview| {
        webview.request_script_dialog(ScriptDialogKind::Prompt, "Name?", "anonymous")
    })
    .unwrap();
    let dialog = wait_for(&events, |event| match event {
        BrowserEvent::ScriptDialog(dialog) => Some(dialog),
        _ => None,
    });
    assert_eq!(dialog.kind(), ScriptDialogKind::Prompt);
    assert_eq!(dialog.message(), "Name?");
    assert_eq!(dialog.default_text(), "anonymous");
    assert_eq!(dialog.url(), "https://example.com/form");

    dialog.set_input("Ada").unwrap();
    dialog.accept().unwrap();
    dialog.process().unwrap();
    assert!(matches!(dialog.process(), Err(BridgeError::AlreadyResolved)));

    browser.bridge().flush().unwrap();
    let (_, outcome) = probe
        .completions()
        .into_iter()
        .find(|(name, _)| *name == "script_dialog")
        .unwrap();
    assert_eq!(outcome["accepted"], json!(true));
    assert_eq!(outcome["result_text"], json!("Ada"));
    environment.shutdown().unwrap();
}

#[test]
fn test_resolving_after_browser_destroyed_is_a_no_op() {
    let (environment, probe) = environment("detach-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_permission(PermissionKind::Camera)).unwrap();
    let permission = wait_for(&events, |event| match event {
        BrowserEvent::PermissionRequested(request) => Some(request),
        _ => None,
    });
    assert_eq!(permission.kind(), PermissionKind::Camera);

    browser.destroy();
    assert!(browser.is_destroyed());
    assert!(matches!(
        permission.set_state(PermissionState::Allow),
        Err(BridgeError::Detached)
    ));
    assert!(matches!(permission.process(true), Err(BridgeError::Detached)));

    environment.bridge().flush().unwrap();
    assert!(probe.completions().iter().all(|(name, _)| *name != "permission"));
    environment.shutdown().unwrap();
}

/// Park the owner thread until the returned sender fires or drops
fn hold_owner(browser: &Arc<Browser>) -> crossbeam_channel::Sender<()> {
    let (release, gate) = crossbeam_channel::bounded::<()>(1);
    browser.bridge().post(move || {
        let _ = gate.recv();
    });
    release
}

fn completions_named(probe: &HeadlessProbe, request: &str) -> Vec<Value> {
    probe
        .completions()
        .into_iter()
        .filter(|(name, _)| *name == request)
        .map(|(_, outcome)| outcome)
        .collect()
}

#[test]
fn test_resolution_queued_before_destroy_is_dropped() {
    let (environment, probe) = environment("queued-detach-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_permission(PermissionKind::Microphone)).unwrap();
    let permission = wait_for(&events, |event| match event {
        BrowserEvent::PermissionRequested(request) => Some(request),
        _ => None,
    });

    let release = hold_owner(&browser);
    permission.set_state(PermissionState::Allow).unwrap();
    permission.process(true).unwrap();
    assert!(permission.is_resolved());
    browser.destroy();
    release.send(()).unwrap();

    environment.bridge().flush().unwrap();
    assert!(completions_named(&probe, "permission").is_empty());
    environment.shutdown().unwrap();
}

#[test]
fn test_intercept_answer_queued_before_destroy_is_dropped() {
    let (environment, probe) = environment("queued-intercept-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.set_request_interception(true).unwrap();

    let paused = json!({
        "requestId": "r-queued",
        "request": { "url": "https://api.test/slow", "method": "GET", "headers": {} },
    })
    .to_string();
    drive(&browser, move |webview| {
        webview.raise_protocol_event("Fetch.requestPaused", &paused)
    })
    .unwrap();
    let intercept = wait_for(&events, |event| match event {
        BrowserEvent::RequestIntercepted(request) => Some(request),
        _ => None,
    });

    let release = hold_owner(&browser);
    intercept.fail("").unwrap();
    browser.destroy();
    release.send(()).unwrap();

    environment.bridge().flush().unwrap();
    assert!(
        probe
            .protocol_calls()
            .iter()
            .all(|(method, _)| method != "Fetch.failRequest")
    );
    environment.shutdown().unwrap();
}

#[test]
fn test_context_menu_edits_applied_before_completion() {
    let (environment, probe) = environment("menu-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.navigate("https://example.com/article").unwrap();

    drive(&browser, |webview| webview.request_context_menu(40, 25)).unwrap();
    let menu = wait_for(&events, |event| match event {
        BrowserEvent::ContextMenuRequested(request) => Some(request),
        _ => None,
    });
    assert_eq!(menu.location().unwrap(), (40, 25));
    assert_eq!(menu.target().unwrap().page_uri, "https://example.com/article");

    let items = menu.menu_items().unwrap();
    assert_eq!(items.len().unwrap(), 3);
    assert_eq!(items.get(1).unwrap().label().unwrap(), "Reload");

    let translate = menu
        .create_item("Translate", None, MenuItemKind::Command)
        .unwrap();
    let command = translate.command_id().unwrap();
    items.insert(3, &translate).unwrap();
    items.remove(0).unwrap();
    menu.set_selected_command(command).unwrap();

    menu.process(true).unwrap();
    assert!(matches!(menu.process(false), Err(BridgeError::AlreadyResolved)));
    assert!(matches!(menu.menu_items(), Err(BridgeError::AlreadyResolved)));

    browser.bridge().flush().unwrap();
    let outcomes = completions_named(&probe, "context_menu");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["handled"], json!(true));
    assert_eq!(outcomes[0]["selected_command"], json!(command));
    assert_eq!(outcomes[0]["items"], json!(["Reload", "Inspect", "Translate"]));
    environment.shutdown().unwrap();
}

#[test]
fn test_context_menu_after_destroy_is_detached() {
    let (environment, probe) = environment("menu-detach-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_context_menu(0, 0)).unwrap();
    let menu = wait_for(&events, |event| match event {
        BrowserEvent::ContextMenuRequested(request) => Some(request),
        _ => None,
    });

    browser.destroy();
    assert!(matches!(menu.set_selected_command(1), Err(BridgeError::Detached)));
    assert!(matches!(menu.process(true), Err(BridgeError::Detached)));

    environment.bridge().flush().unwrap();
    assert!(completions_named(&probe, "context_menu").is_empty());
    environment.shutdown().unwrap();
}

#[test]
fn test_basic_auth_answered_once() {
    let (environment, probe) = environment("auth-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| {
        webview.request_basic_auth("https://intranet.test/", "Basic realm=\"corp\"")
    })
    .unwrap();
    let auth = wait_for(&events, |event| match event {
        BrowserEvent::BasicAuthRequested(request) => Some(request),
        _ => None,
    });
    assert_eq!(auth.uri(), "https://intranet.test/");
    assert_eq!(auth.challenge(), "Basic realm=\"corp\"");

    auth.set_credentials("ada", "lovelace").unwrap();
    assert!(matches!(auth.cancel(), Err(BridgeError::AlreadyResolved)));
    assert!(auth.is_resolved());

    browser.bridge().flush().unwrap();
    let outcomes = completions_named(&probe, "basic_auth");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["user"], json!("ada"));
    assert_eq!(outcomes[0]["password"], json!("lovelace"));
    assert_eq!(outcomes[0]["cancel"], json!(false));
    environment.shutdown().unwrap();
}

#[test]
fn test_basic_auth_after_destroy_is_detached() {
    let (environment, probe) = environment("auth-detach-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_basic_auth("https://intranet.test/", "Basic"))
        .unwrap();
    let auth = wait_for(&events, |event| match event {
        BrowserEvent::BasicAuthRequested(request) => Some(request),
        _ => None,
    });

    browser.destroy();
    assert!(matches!(auth.set_credentials("ada", "pw"), Err(BridgeError::Detached)));
    assert!(matches!(auth.cancel(), Err(BridgeError::Detached)));

    environment.bridge().flush().unwrap();
    assert!(completions_named(&probe, "basic_auth").is_empty());
    environment.shutdown().unwrap();
}

#[test]
fn test_download_result_path_applied_before_handle() {
    let (environment, probe) = environment("download-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_download("https://files.test/report.pdf")).unwrap();
    let download = wait_for(&events, |event| match event {
        BrowserEvent::DownloadStarting(request) => Some(request),
        _ => None,
    });
    assert_eq!(download.result_path().unwrap(), "downloads/report.pdf");

    download.set_result_path("archive/2026/report.pdf").unwrap();
    download.handle(true).unwrap();
    assert!(matches!(download.handle(false), Err(BridgeError::AlreadyResolved)));
    assert!(matches!(download.set_cancel(true), Err(BridgeError::AlreadyResolved)));

    browser.bridge().flush().unwrap();
    let outcomes = completions_named(&probe, "download");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["result_path"], json!("archive/2026/report.pdf"));
    assert_eq!(outcomes[0]["handled"], json!(true));
    assert_eq!(outcomes[0]["cancel"], json!(false));
    environment.shutdown().unwrap();
}

#[test]
fn test_download_operation_progress() {
    let (environment, _) = environment("download-op-owner");
    let (browser, events) = browser_with_events(&environment);

    drive(&browser, |webview| webview.request_download("https://files.test/data.bin")).unwrap();
    let download = wait_for(&events, |event| match event {
        BrowserEvent::DownloadStarting(request) => Some(request),
        _ => None,
    });
    let operation = download.operation().unwrap();
    download.handle(false).unwrap();

    assert_eq!(operation.uri().unwrap(), "https://files.test/data.bin");
    assert_eq!(operation.result_path().unwrap(), "downloads/data.bin");
    assert_eq!(operation.mime_type().unwrap(), "application/octet-stream");
    assert_eq!(operation.state().unwrap(), DownloadState::InProgress);
    assert_eq!(operation.total_bytes().unwrap(), 1024);
    assert_eq!(operation.received_bytes().unwrap(), 0);
    assert!(!operation.can_resume().unwrap());

    operation.pause().unwrap();
    assert!(operation.can_resume().unwrap());
    operation.resume().unwrap();
    assert_eq!(operation.state().unwrap(), DownloadState::Completed);
    assert_eq!(operation.received_bytes().unwrap(), 1024);

    browser.destroy();
    assert!(matches!(operation.state(), Err(BridgeError::BrowserGone)));
    environment.shutdown().unwrap();
}

fn raise_paused_response(browser: &Arc<Browser>, request_id: &str) {
    let paused = json!({
        "requestId": request_id,
        "request": { "url": "https://api.test/data", "method": "GET", "headers": {} },
        "resourceType": "Fetch",
        "responseStatusCode": 404,
        "responseStatusText": "Not Found",
        "responseHeaders": [{ "name": "Content-Type", "value": "text/html" }],
    })
    .to_string();
    let raised = drive(browser, move |webview| {
        webview.raise_protocol_event("Fetch.requestPaused", &paused)
    })
    .unwrap();
    assert!(raised);
}

#[test]
fn test_intercepted_response_is_answered_once() {
    let (environment, probe) = environment("response-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.set_request_interception(true).unwrap();

    raise_paused_response(&browser, "r-7");
    let response = wait_for(&events, |event| match event {
        BrowserEvent::ResponseIntercepted(response) => Some(response),
        _ => None,
    });
    assert_eq!(response.request().url, "https://api.test/data");
    assert_eq!(response.status_code(), 404);
    assert_eq!(response.status_text(), "Not Found");
    let headers = response.headers();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].name, "Content-Type");
    assert_eq!(headers[0].value, "text/html");

    response.continue_response(None).unwrap();
    assert!(matches!(
        response.fulfill(None, b"replaced"),
        Err(BridgeError::AlreadyResolved)
    ));
    assert!(response.is_resolved());

    browser.bridge().flush().unwrap();
    let calls = probe.protocol_calls();
    let continued: Vec<Value> = calls
        .iter()
        .filter(|(method, _)| method == "Fetch.continueResponse")
        .map(|(_, params)| serde_json::from_str(params).unwrap())
        .collect();
    assert_eq!(continued.len(), 1);
    assert_eq!(continued[0]["requestId"], json!("r-7"));
    assert_eq!(continued[0]["responseCode"], json!(404));
    assert!(calls.iter().all(|(method, _)| method != "Fetch.fulfillRequest"));
    environment.shutdown().unwrap();
}

#[test]
fn test_intercepted_response_after_destroy_is_detached() {
    let (environment, probe) = environment("response-detach-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.set_request_interception(true).unwrap();

    raise_paused_response(&browser, "r-8");
    let response = wait_for(&events, |event| match event {
        BrowserEvent::ResponseIntercepted(response) => Some(response),
        _ => None,
    });

    browser.destroy();
    assert!(matches!(response.continue_response(None), Err(BridgeError::Detached)));
    assert!(matches!(response.fulfill(None, b""), Err(BridgeError::Detached)));

    environment.bridge().flush().unwrap();
    assert!(
        probe
            .protocol_calls()
            .iter()
            .all(|(method, _)| method != "Fetch.continueResponse" && method != "Fetch.fulfillRequest")
    );
    environment.shutdown().unwrap();
}

#[test]
fn test_handle_export_and_release_counts() {
    let (environment, _) = environment("handles-owner");
    let (browser, _events) = browser_with_events(&environment);
    let handles = HandleTable::new();

    assert_eq!(handles.find(&browser), None);
    let id = handles.export(browser.clone());
    for expected in 2..=5 {
        assert_eq!(handles.export(browser.clone()), id);
        assert_eq!(handles.ref_count(id), expected);
    }

    for remaining in (1..5).rev() {
        assert_eq!(handles.release(id, Category::Browser).unwrap(), remaining);
        assert!(!browser.is_destroyed());
    }
    assert_eq!(handles.release(id, Category::Browser).unwrap(), 0);
    assert!(browser.is_destroyed());
    assert!(!handles.contains(id));
    assert!(matches!(
        handles.release(id, Category::Browser),
        Err(BridgeError::InvalidHandle(_))
    ));
    environment.shutdown().unwrap();
}

#[test]
fn test_handle_category_mismatch() {
    let (environment, _) = environment("category-owner");
    let (browser, _events) = browser_with_events(&environment);
    let handles = HandleTable::new();
    let id = handles.export(browser.clone());

    assert!(matches!(
        handles.add_ref(id, Category::Frame),
        Err(BridgeError::WrongCategory { expected: Category::Frame, actual: Category::Browser, .. })
    ));
    assert!(matches!(
        handles.release(id, Category::Environment),
        Err(BridgeError::WrongCategory { .. })
    ));
    assert_eq!(handles.ref_count(id), 1);

    let registry = OpRegistry::standard();
    let ctx = OpContext::new(Arc::new(handles));
    assert!(matches!(
        registry.invoke_named(&ctx, id, Category::Frame, "name", &[]),
        Err(BridgeError::WrongCategory { .. })
    ));
    environment.shutdown().unwrap();
}

#[test]
fn test_frames_removed_by_id_out_of_order() {
    let (environment, _) = environment("frames-owner");
    let (browser, _events) = browser_with_events(&environment);

    let ids = drive(&browser, |webview| {
        vec![
            webview.attach_frame("a"),
            webview.attach_frame("b"),
            webview.attach_frame("c"),
        ]
    })
    .unwrap();
    assert_eq!(browser.frame_count(), 3);
    let frames = browser.frames();
    assert_eq!(frames[1].name().unwrap(), "b");

    let (first, middle) = (ids[0], ids[1]);
    drive(&browser, move |webview| {
        webview.detach_frame(middle);
        webview.detach_frame(first);
    })
    .unwrap();

    assert_eq!(browser.frame_count(), 1);
    assert_eq!(browser.frame_at(0).map(|frame| frame.id()), Some(ids[2]));
    assert_eq!(frames[0].state(), FrameState::Destroyed);
    assert_eq!(frames[1].state(), FrameState::Destroyed);
    assert_eq!(frames[2].state(), FrameState::Live);
    assert!(frames[0].name().is_err());
    environment.shutdown().unwrap();
}

#[test]
fn test_bare_host_navigation_falls_back_to_http() {
    let (environment, probe) = environment("fallback-owner");
    let (browser, _events) = browser_with_events(&environment);

    browser.navigate("example.com").unwrap();
    assert_eq!(browser.source_url().unwrap(), "http://example.com/");
    assert_eq!(browser.title().unwrap(), "example.com");
    assert_eq!(
        probe.count(|record| matches!(record, ProbeRecord::NavigationRejected { url } if url == "example.com")),
        1
    );

    browser.navigate("not a url").unwrap();
    assert_eq!(browser.source_url().unwrap(), "http://example.com/");
    environment.shutdown().unwrap();
}

struct BlockingHandler;

impl BrowserEventHandler for BlockingHandler {
    fn on_event(&self, _browser: &Arc<Browser>, _event: BrowserEvent) {}

    fn on_navigation_starting(&self, _browser: &Arc<Browser>, navigation: &NavigationStarting) -> bool {
        navigation.url.contains("blocked")
    }
}

#[test]
fn test_inline_handler_cancels_navigation() {
    let (environment, probe) = environment("cancel-owner");
    let browser = environment
        .create_browser(BrowserOptions::default(), Arc::new(BlockingHandler))
        .unwrap();

    browser.navigate("https://allowed.test/").unwrap();
    browser.navigate("https://blocked.test/").unwrap();
    assert_eq!(browser.source_url().unwrap(), "https://allowed.test/");
    assert!(!browser.can_go_forward().unwrap());
    assert_eq!(
        probe.count(|record| matches!(record, ProbeRecord::NavigationCancelled { .. })),
        1
    );
    environment.shutdown().unwrap();
}

#[test]
fn test_history_navigation() {
    let (environment, _) = environment("history-owner");
    let (browser, _events) = browser_with_events(&environment);

    browser.navigate("https://one.test/").unwrap();
    browser.navigate("https://two.test/").unwrap();
    assert!(browser.can_go_back().unwrap());
    browser.go_back().unwrap();
    assert_eq!(browser.source_url().unwrap(), "https://one.test/");
    assert!(browser.can_go_forward().unwrap());
    browser.go_forward().unwrap();
    assert_eq!(browser.title().unwrap(), "two.test");
    environment.shutdown().unwrap();
}

#[test]
fn test_intercepted_request_is_answered_over_protocol() {
    let (environment, probe) = environment("intercept-owner");
    let (browser, events) = browser_with_events(&environment);
    browser.set_request_interception(true).unwrap();

    let paused = json!({
        "requestId": "r-1",
        "request": { "url": "https://api.test/data", "method": "GET", "headers": {} },
        "resourceType": "XHR",
        "frameId": "main",
    })
    .to_string();
    let raised = drive(&browser, move |webview| {
        webview.raise_protocol_event("Fetch.requestPaused", &paused)
    })
    .unwrap();
    assert!(raised);

    let intercept = wait_for(&events, |event| match event {
        BrowserEvent::RequestIntercepted(request) => Some(request),
        _ => None,
    });
    assert_eq!(intercept.request().url, "https://api.test/data");
    intercept.fail("").unwrap();
    assert!(matches!(
        intercept.continue_request(None),
        Err(BridgeError::AlreadyResolved)
    ));

    browser.bridge().flush().unwrap();
    let (_, params) = probe
        .protocol_calls()
        .into_iter()
        .find(|(method, _)| method == "Fetch.failRequest")
        .unwrap();
    let params: Value = serde_json::from_str(&params).unwrap();
    assert_eq!(params["requestId"], json!("r-1"));
    assert_eq!(params["errorReason"], json!("Failed"));
    environment.shutdown().unwrap();
}

#[test]
fn test_cookie_manager_round_trip() {
    let (environment, _) = environment("cookie-owner");
    let (browser, _events) = browser_with_events(&environment);
    let cookies = browser.cookie_manager().unwrap();

    cookies
        .set_cookie(Cookie {
            name: "session".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires: -1.0,
            is_session: true,
            ..Cookie::default()
        })
        .unwrap();
    assert!(matches!(
        cookies.set_cookie(Cookie::default()),
        Err(BridgeError::InvalidArgument(_))
    ));

    let found = cookies.cookies("https://www.example.com/page").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value, "abc");
    assert!(cookies.cookies("https://other.test/").unwrap().is_empty());

    cookies.delete_all().unwrap();
    assert!(cookies.cookies("").unwrap().is_empty());
    environment.shutdown().unwrap();
}

#[test]
fn test_dom_reads_page_script_results() {
    let (environment, probe) = environment("dom-owner");
    let (browser, _events) = browser_with_events(&environment);
    probe.respond_to_script("innerText", "\"Hello\"");
    probe.respond_to_script(".checked", "true");

    let dom = browser.dom().unwrap();
    assert_eq!(dom.inner_text("#greeting", 0).unwrap(), "Hello");
    assert!(dom.is_checked("input[type=checkbox]", 1).unwrap());

    dom.set_value("#name", 0, "Ada").unwrap();
    browser.bridge().flush().unwrap();
    assert!(
        probe
            .scripts()
            .iter()
            .any(|script| script.contains("\"#name\"") && script.contains("\"Ada\""))
    );
    environment.shutdown().unwrap();
}

#[test]
fn test_shutdown_tears_down_browsers() {
    let (environment, probe) = environment("shutdown-owner");
    let (browser, _events) = browser_with_events(&environment);

    environment.shutdown().unwrap();
    assert!(browser.is_destroyed());
    assert!(browser.title().is_err());
    assert!(matches!(
        environment.create_browser(BrowserOptions::default(), Arc::new(IgnoreEvents)),
        Err(BridgeError::EnvironmentGone)
    ));
    assert_eq!(
        probe.count(|record| matches!(record, ProbeRecord::EngineShutdown)),
        1
    );
}
