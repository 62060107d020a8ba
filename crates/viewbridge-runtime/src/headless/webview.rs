use super::probe::{HeadlessProbe, ProbeRecord};
use super::requests::{
    HeadlessAuthArgs, HeadlessContextMenuArgs, HeadlessDeferral, HeadlessDialogArgs,
    HeadlessDownloadArgs, HeadlessMenuItem, HeadlessNewWindowArgs, HeadlessPermissionArgs,
};
use crate::config::BrowserSettings;
use crate::engine::{
    Cookie, CookieStore, CookiesCallback, EngineEvents, ExtensionBackend, ExtensionCallback,
    FrameBackend, FrameId, HostResourceAccess, KeyEvent, KeyEventKind, MenuItemKind,
    NavigationStarting, PermissionKind, ScriptCallback, ScriptDialogKind, WebViewBackend,
};
use crate::error::{BridgeError, BridgeResult};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use url::Url;

const BLANK: &str = "about:blank";
const DEFAULT_USER_AGENT: &str = concat!("Mozilla/5.0 (headless) viewbridge/", env!("CARGO_PKG_VERSION"));

/// In-memory browsing surface.
///
/// Navigations commit immediately and raise the usual notification sequence. The
/// `request_*` and `raise_*` methods let tests play the engine's side.
pub struct HeadlessWebView {
    events: Rc<dyn EngineEvents>,
    probe: HeadlessProbe,
    profile: String,
    extensions_enabled: bool,
    history: RefCell<Vec<String>>,
    position: Cell<usize>,
    next_navigation: Cell<u64>,
    title: RefCell<String>,
    settings: Cell<BrowserSettings>,
    zoom: Cell<f64>,
    muted: Cell<bool>,
    suspended: Cell<bool>,
    user_agent: RefCell<String>,
    init_scripts: RefCell<Vec<(String, String)>>,
    next_init_script: Cell<u64>,
    host_mappings: RefCell<HashMap<String, (String, HostResourceAccess)>>,
    background: Cell<u32>,
    subscriptions: RefCell<HashSet<String>>,
    frames: RefCell<Vec<Rc<HeadlessFrame>>>,
    next_frame: Cell<FrameId>,
    cookies: Rc<HeadlessCookieStore>,
    next_extension: Cell<u32>,
    closed: Cell<bool>,
}

impl HeadlessWebView {
    pub(crate) fn new(
        profile: String,
        extensions_enabled: bool,
        events: Rc<dyn EngineEvents>,
        probe: HeadlessProbe,
    ) -> Rc<Self> {
        Rc::new(Self {
            events,
            probe,
            profile,
            extensions_enabled,
            history: RefCell::new(Vec::new()),
            position: Cell::new(0),
            next_navigation: Cell::new(1),
            title: RefCell::new(String::new()),
            settings: Cell::new(BrowserSettings::default()),
            zoom: Cell::new(1.0),
            muted: Cell::new(false),
            suspended: Cell::new(false),
            user_agent: RefCell::new(DEFAULT_USER_AGENT.to_string()),
            init_scripts: RefCell::new(Vec::new()),
            next_init_script: Cell::new(1),
            host_mappings: RefCell::new(HashMap::new()),
            background: Cell::new(0xFFFF_FFFF),
            subscriptions: RefCell::new(HashSet::new()),
            frames: RefCell::new(Vec::new()),
            next_frame: Cell::new(1),
            cookies: Rc::new(HeadlessCookieStore::default()),
            next_extension: Cell::new(1),
            closed: Cell::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn probe(&self) -> &HeadlessProbe {
        &self.probe
    }

    pub fn background_color(&self) -> u32 {
        self.background.get()
    }

    pub fn init_script_count(&self) -> usize {
        self.init_scripts.borrow().len()
    }

    pub fn host_mapping(&self, host: &str) -> Option<(String, HostResourceAccess)> {
        self.host_mappings.borrow().get(host).cloned()
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.subscriptions.borrow().contains(event)
    }

    /// Raise the navigation sequence for `url`; `push` adds a history entry
    fn commit(&self, url: &str, push: bool) {
        let navigation_id = self.next_navigation.get();
        self.next_navigation.set(navigation_id + 1);

        let starting = NavigationStarting {
            url: url.to_string(),
            navigation_id,
            ..NavigationStarting::default()
        };
        if self.events.navigation_starting(&starting) {
            self.probe.record(ProbeRecord::NavigationCancelled {
                url: url.to_string(),
                navigation_id,
            });
            return;
        }

        if push {
            let mut history = self.history.borrow_mut();
            if !history.is_empty() {
                history.truncate(self.position.get() + 1);
            }
            history.push(url.to_string());
            self.position.set(history.len() - 1);
        }
        let title = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        *self.title.borrow_mut() = title.clone();
        self.probe.record(ProbeRecord::Navigated {
            url: url.to_string(),
            navigation_id,
        });

        self.events.source_changed(true);
        self.events.content_loading(false, navigation_id);
        if push {
            self.events.history_changed();
        }
        self.events.title_changed(&title);
        self.events.navigation_completed(true, 200, navigation_id);
    }

    fn current(&self) -> Option<String> {
        self.history.borrow().get(self.position.get()).cloned()
    }

    fn step(&self, forward: bool) {
        let position = self.position.get();
        let target = if forward {
            (position + 1 < self.history.borrow().len()).then_some(position + 1)
        } else {
            position.checked_sub(1)
        };
        if let Some(target) = target {
            self.position.set(target);
            if let Some(url) = self.current() {
                self.commit(&url, false);
                self.events.history_changed();
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine-side drivers
    // ------------------------------------------------------------------

    /// Add an iframe and report it; returns its id
    pub fn attach_frame(&self, name: &str) -> FrameId {
        let id = self.next_frame.get();
        self.next_frame.set(id + 1);
        let frame = Rc::new(HeadlessFrame {
            id,
            name: name.to_string(),
            probe: self.probe.clone(),
        });
        self.frames.borrow_mut().push(frame.clone());
        self.events.frame_created(frame);
        id
    }

    pub fn detach_frame(&self, id: FrameId) {
        self.frames.borrow_mut().retain(|frame| frame.id != id);
        self.events.frame_destroyed(id);
    }

    pub fn navigate_frame(&self, id: FrameId, url: &str) {
        self.events.frame_navigation_starting(id, url);
    }

    pub fn post_from_frame(&self, id: FrameId, message: &str) {
        let source = self.current().unwrap_or_else(|| BLANK.to_string());
        self.events.frame_web_message(id, &source, message);
    }

    pub fn post_from_page(&self, message: &str) {
        let source = self.current().unwrap_or_else(|| BLANK.to_string());
        self.events.web_message_received(&source, message);
    }

    /// Deliver a protocol event if it was subscribed; returns whether it was
    pub fn raise_protocol_event(&self, method: &str, params: &str) -> bool {
        if !self.is_subscribed(method) {
            return false;
        }
        self.events.protocol_event(method, params);
        true
    }

    pub fn request_close(&self) {
        self.events.close_requested();
    }

    pub fn request_new_window(&self, uri: &str) {
        let args = HeadlessNewWindowArgs::new(uri);
        let deferral = HeadlessDeferral::new("new_window", &self.probe, args.clone());
        self.events.new_window_requested(args, deferral);
    }

    pub fn request_script_dialog(&self, kind: ScriptDialogKind, message: &str, default_text: &str) {
        let url = self.current().unwrap_or_else(|| BLANK.to_string());
        let args = HeadlessDialogArgs::new(&url, kind, message, default_text);
        let deferral = HeadlessDeferral::new("script_dialog", &self.probe, args.clone());
        self.events.script_dialog(args, deferral);
    }

    pub fn request_permission(&self, kind: PermissionKind) {
        let url = self.current().unwrap_or_else(|| BLANK.to_string());
        let args = HeadlessPermissionArgs::new(&url, kind);
        let deferral = HeadlessDeferral::new("permission", &self.probe, args.clone());
        self.events.permission_requested(args, deferral);
    }

    pub fn request_context_menu(&self, x: i32, y: i32) {
        let url = self.current().unwrap_or_else(|| BLANK.to_string());
        let args = HeadlessContextMenuArgs::new(&url, (x, y));
        let deferral = HeadlessDeferral::new("context_menu", &self.probe, args.clone());
        self.events.context_menu_requested(args, deferral);
    }

    pub fn select_menu_item(&self, label: &str, command_id: i32) {
        self.events
            .context_menu_item_selected(HeadlessMenuItem::new(label, command_id, MenuItemKind::Command));
    }

    pub fn request_basic_auth(&self, uri: &str, challenge: &str) {
        let args = HeadlessAuthArgs::new(uri, challenge);
        let deferral = HeadlessDeferral::new("basic_auth", &self.probe, args.clone());
        self.events.basic_auth_requested(args, deferral);
    }

    pub fn request_download(&self, uri: &str) {
        let args = HeadlessDownloadArgs::new(uri);
        let deferral = HeadlessDeferral::new("download", &self.probe, args.clone());
        self.events.download_starting(args, deferral);
    }

    /// Report a key press; returns whether the embedder handled it
    pub fn press_key(&self, virtual_key: u32) -> bool {
        self.events.key_event(&KeyEvent {
            kind: KeyEventKind::KeyDown,
            virtual_key,
            lparam: 0,
            repeat_count: 1,
            scan_code: 0,
            is_extended_key: false,
            is_menu_key_down: false,
            was_key_down: false,
            is_key_released: false,
        })
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.events.fullscreen_changed(fullscreen);
    }

    pub fn set_status_text(&self, text: &str) {
        self.events.status_text_changed(text);
    }

    pub fn set_favicon(&self, url: &str) {
        self.events.favicon_changed(url);
    }

    pub fn set_audio_playing(&self, playing: bool) {
        self.events.audio_state_changed(playing);
    }
}

impl WebViewBackend for HeadlessWebView {
    fn navigate(&self, url: &str) -> BridgeResult<()> {
        if self.closed.get() {
            return Err(BridgeError::invalid_state("surface is closed"));
        }
        let parsed = Url::parse(url).map_err(|e| {
            self.probe.record(ProbeRecord::NavigationRejected {
                url: url.to_string(),
            });
            BridgeError::invalid_argument(format!("{}: {}", url, e))
        })?;
        self.commit(parsed.as_str(), true);
        Ok(())
    }

    fn can_go_back(&self) -> bool {
        self.position.get() > 0
    }

    fn can_go_forward(&self) -> bool {
        self.position.get() + 1 < self.history.borrow().len()
    }

    fn go_back(&self) {
        self.step(false);
    }

    fn go_forward(&self) {
        self.step(true);
    }

    fn reload(&self) {
        if let Some(url) = self.current() {
            self.commit(&url, false);
        }
    }

    fn stop(&self) {}

    fn source_url(&self) -> String {
        self.current().unwrap_or_else(|| BLANK.to_string())
    }

    fn title(&self) -> String {
        self.title.borrow().clone()
    }

    fn settings(&self) -> BrowserSettings {
        self.settings.get()
    }

    fn set_settings(&self, settings: &BrowserSettings) {
        self.settings.set(*settings);
    }

    fn execute_script(&self, script: &str, callback: ScriptCallback) {
        if self.closed.get() {
            return callback(Err(BridgeError::invalid_state("surface is closed")));
        }
        self.probe.record(ProbeRecord::Script {
            frame: None,
            script: script.to_string(),
        });
        if !self.settings.get().enable_scripts {
            return callback(Err(BridgeError::engine("scripts are disabled")));
        }
        callback(Ok(self.probe.script_response(script)));
    }

    fn call_protocol_method(&self, method: &str, params: &str, callback: ScriptCallback) {
        if self.closed.get() {
            return callback(Err(BridgeError::invalid_state("surface is closed")));
        }
        self.probe.record(ProbeRecord::ProtocolCall {
            method: method.to_string(),
            params: params.to_string(),
        });
        callback(Ok(self.probe.protocol_response(method)));
    }

    fn subscribe_protocol_event(&self, event: &str) {
        self.subscriptions.borrow_mut().insert(event.to_string());
    }

    fn zoom_factor(&self) -> f64 {
        self.zoom.get()
    }

    fn set_zoom_factor(&self, factor: f64) {
        self.zoom.set(factor);
    }

    fn is_muted(&self) -> bool {
        self.muted.get()
    }

    fn set_muted(&self, muted: bool) {
        self.muted.set(muted);
    }

    fn suspend(&self) {
        self.suspended.set(true);
    }

    fn resume(&self) {
        self.suspended.set(false);
    }

    fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    fn user_agent(&self) -> String {
        self.user_agent.borrow().clone()
    }

    fn set_user_agent(&self, user_agent: &str) {
        *self.user_agent.borrow_mut() = user_agent.to_string();
    }

    fn add_init_script(&self, script: &str, callback: ScriptCallback) {
        let id = self.next_init_script.get();
        self.next_init_script.set(id + 1);
        let id = format!("init-{}", id);
        self.init_scripts
            .borrow_mut()
            .push((id.clone(), script.to_string()));
        callback(Ok(id));
    }

    fn remove_init_script(&self, id: &str) {
        self.init_scripts.borrow_mut().retain(|(existing, _)| existing != id);
    }

    fn post_web_message(&self, message: &str, as_json: bool) {
        self.probe.record(ProbeRecord::WebMessage {
            frame: None,
            message: message.to_string(),
            as_json,
        });
    }

    fn set_virtual_host_mapping(&self, host: &str, folder: &str, access: HostResourceAccess) {
        self.host_mappings
            .borrow_mut()
            .insert(host.to_string(), (folder.to_string(), access));
    }

    fn clear_virtual_host_mapping(&self, host: &str) {
        self.host_mappings.borrow_mut().remove(host);
    }

    fn set_background_color(&self, argb: u32) {
        self.background.set(argb);
    }

    fn cookie_store(&self) -> Rc<dyn CookieStore> {
        self.cookies.clone()
    }

    fn load_extension(&self, path: &str, callback: ExtensionCallback) {
        if !self.extensions_enabled {
            return callback(Err(BridgeError::invalid_state(
                "extensions are disabled for this environment",
            )));
        }
        let Some(name) = Path::new(path).file_name().and_then(|name| name.to_str()) else {
            return callback(Err(BridgeError::invalid_argument(format!(
                "not an extension folder: {:?}",
                path
            ))));
        };
        let serial = self.next_extension.get();
        self.next_extension.set(serial + 1);
        let extension: Rc<dyn ExtensionBackend> = Rc::new(HeadlessExtension {
            id: format!("ext-{}", serial),
            name: name.to_string(),
            enabled: Cell::new(true),
        });
        callback(Ok(extension));
    }

    fn profile_name(&self) -> String {
        self.profile.clone()
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.frames.borrow_mut().clear();
        self.probe.record(ProbeRecord::WebViewClosed);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct HeadlessFrame {
    id: FrameId,
    name: String,
    probe: HeadlessProbe,
}

impl FrameBackend for HeadlessFrame {
    fn id(&self) -> FrameId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute_script(&self, script: &str, callback: ScriptCallback) {
        self.probe.record(ProbeRecord::Script {
            frame: Some(self.id),
            script: script.to_string(),
        });
        callback(Ok(self.probe.script_response(script)));
    }

    fn post_web_message(&self, message: &str, as_json: bool) {
        self.probe.record(ProbeRecord::WebMessage {
            frame: Some(self.id),
            message: message.to_string(),
            as_json,
        });
    }
}

/// Cookie jar matched by domain suffix, path prefix and scheme
#[derive(Default)]
pub struct HeadlessCookieStore {
    cookies: RefCell<Vec<Cookie>>,
}

fn cookie_matches(cookie: &Cookie, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let domain = cookie.domain.trim_start_matches('.');
    let domain_ok = host == domain || host.ends_with(&format!(".{}", domain));
    let path_ok = cookie.path.is_empty() || url.path().starts_with(&cookie.path);
    let scheme_ok = !cookie.secure || url.scheme() == "https";
    domain_ok && path_ok && scheme_ok
}

impl CookieStore for HeadlessCookieStore {
    fn cookies(&self, url: &str, callback: CookiesCallback) {
        if url.is_empty() {
            return callback(Ok(self.cookies.borrow().clone()));
        }
        match Url::parse(url) {
            Ok(url) => {
                let matching = self
                    .cookies
                    .borrow()
                    .iter()
                    .filter(|cookie| cookie_matches(cookie, &url))
                    .cloned()
                    .collect();
                callback(Ok(matching));
            }
            Err(e) => callback(Err(BridgeError::invalid_argument(format!("{}: {}", url, e)))),
        }
    }

    fn set_cookie(&self, cookie: &Cookie) -> BridgeResult<()> {
        if cookie.domain.is_empty() {
            return Err(BridgeError::invalid_argument("cookie domain must not be empty"));
        }
        let mut cookies = self.cookies.borrow_mut();
        cookies.retain(|existing| {
            !(existing.name == cookie.name
                && existing.domain == cookie.domain
                && existing.path == cookie.path)
        });
        cookies.push(cookie.clone());
        Ok(())
    }

    fn delete_cookies(&self, name: &str, url: &str) {
        let url = Url::parse(url).ok();
        self.cookies.borrow_mut().retain(|cookie| {
            let targeted = cookie.name == name
                && url.as_ref().is_none_or(|url| cookie_matches(cookie, url));
            !targeted
        });
    }

    fn delete_all_cookies(&self) {
        self.cookies.borrow_mut().clear();
    }
}

pub struct HeadlessExtension {
    id: String,
    name: String,
    enabled: Cell<bool>,
}

impl ExtensionBackend for HeadlessExtension {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn remove(&self) {
        self.enabled.set(false);
    }
}
