//! Engine backend interface
//!
//! The wrapped engine is an external collaborator. These traits are the whole surface
//! the bridge relies on. Implementations are `!Send` (`Rc`-based) and are only ever
//! called on the owner thread; the bridge is responsible for getting there.
//!
//! Engine-initiated callbacks flow the other way through [`EngineEvents`], which the
//! bridge implements once per browser.
//!
//! Completion callbacks (`ScriptCallback` and friends) may be invoked synchronously or
//! later from an owner-thread task; the bridge supports both.

use crate::config::{BrowserOptions, BrowserSettings};
use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::rc::Rc;

/// Stable identity the engine assigns to a frame
pub type FrameId = u64;

/// Completion of a script evaluation or protocol call; carries a JSON string
pub type ScriptCallback = Box<dyn FnOnce(BridgeResult<String>)>;

/// Completion of a browser surface creation
pub type WebViewCallback = Box<dyn FnOnce(BridgeResult<Rc<dyn WebViewBackend>>)>;

/// Completion of an extension load
pub type ExtensionCallback = Box<dyn FnOnce(BridgeResult<Rc<dyn ExtensionBackend>>)>;

/// Completion of a cookie query
pub type CookiesCallback = Box<dyn FnOnce(BridgeResult<Vec<Cookie>>)>;

// ============================================================================
// Data types
// ============================================================================

/// Kind of engine child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Browser = 0,
    Renderer = 1,
    Utility = 2,
    SandboxHelper = 3,
    Gpu = 4,
    PpapiPlugin = 5,
    PpapiBroker = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub kind: ProcessKind,
}

/// Payload of the inline navigation-starting notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationStarting {
    pub url: String,
    pub is_user_gesture: bool,
    pub is_redirect: bool,
    /// Raw request headers, one `Name: Value` per line
    pub headers: String,
    pub navigation_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
    SystemKeyDown,
    SystemKeyUp,
}

/// Payload of the inline accelerator-key notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub virtual_key: u32,
    pub lparam: i32,
    pub repeat_count: u32,
    pub scan_code: u32,
    pub is_extended_key: bool,
    pub is_menu_key_down: bool,
    pub was_key_down: bool,
    pub is_key_released: bool,
}

/// Window features requested by `window.open`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    pub has_position: bool,
    pub has_size: bool,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub should_display_menu_bar: bool,
    pub should_display_status: bool,
    pub should_display_toolbar: bool,
    pub should_display_scroll_bars: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Unknown,
    Microphone,
    Camera,
    Geolocation,
    Notifications,
    OtherSensors,
    ClipboardRead,
    MultipleAutomaticDownloads,
    FileReadWrite,
    Autoplay,
    LocalFonts,
    MidiSystemExclusiveMessages,
    WindowManagement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Default,
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMenuTargetKind {
    Page,
    Image,
    SelectedText,
    Audio,
    Video,
}

/// What the context menu was opened on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMenuTarget {
    pub kind: ContextMenuTargetKind,
    pub is_editable: bool,
    pub is_requested_for_main_frame: bool,
    pub page_uri: String,
    pub frame_uri: String,
    pub link_uri: Option<String>,
    pub link_text: Option<String>,
    pub source_uri: Option<String>,
    pub selection_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuItemKind {
    Command,
    CheckBox,
    Radio,
    Separator,
    Submenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    InProgress,
    Interrupted,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    None,
    #[default]
    Lax,
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the Unix epoch; `-1` for session cookies
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub is_session: bool,
}

/// Access granted to a virtual host mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostResourceAccess {
    #[default]
    Deny,
    Allow,
    DenyCors,
}

// ============================================================================
// Engine objects
// ============================================================================

/// One loaded engine instance
pub trait EngineBackend {
    /// Version string of the runtime in use
    fn runtime_version(&self) -> BridgeResult<String>;

    fn process_infos(&self) -> Vec<ProcessInfo>;

    /// Create a browsing surface; `ready` fires once it can be driven
    fn create_webview(
        &self,
        options: &BrowserOptions,
        events: Rc<dyn EngineEvents>,
        ready: WebViewCallback,
    );

    /// Called once before the engine is dropped
    fn shutdown(&self) {}
}

/// One browsing surface
pub trait WebViewBackend {
    /// Start a navigation; an unparsable URI is reported as `InvalidArgument`
    fn navigate(&self, url: &str) -> BridgeResult<()>;
    fn can_go_back(&self) -> bool;
    fn can_go_forward(&self) -> bool;
    fn go_back(&self);
    fn go_forward(&self);
    fn reload(&self);
    fn stop(&self);

    fn source_url(&self) -> String;
    fn title(&self) -> String;

    fn settings(&self) -> BrowserSettings;
    fn set_settings(&self, settings: &BrowserSettings);

    fn execute_script(&self, script: &str, callback: ScriptCallback);
    fn call_protocol_method(&self, method: &str, params: &str, callback: ScriptCallback);
    /// Ask the engine to deliver `event` through [`EngineEvents::protocol_event`]
    fn subscribe_protocol_event(&self, event: &str);

    fn zoom_factor(&self) -> f64;
    fn set_zoom_factor(&self, factor: f64);
    fn is_muted(&self) -> bool;
    fn set_muted(&self, muted: bool);
    fn suspend(&self);
    fn resume(&self);
    fn is_suspended(&self) -> bool;
    fn user_agent(&self) -> String;
    fn set_user_agent(&self, user_agent: &str);

    /// Register a script run on every new document; the callback receives its id
    fn add_init_script(&self, script: &str, callback: ScriptCallback);
    fn remove_init_script(&self, id: &str);

    fn post_web_message(&self, message: &str, as_json: bool);
    fn set_virtual_host_mapping(&self, host: &str, folder: &str, access: HostResourceAccess);
    fn clear_virtual_host_mapping(&self, host: &str);
    fn set_background_color(&self, argb: u32);

    fn cookie_store(&self) -> Rc<dyn CookieStore>;
    fn load_extension(&self, path: &str, callback: ExtensionCallback);
    fn profile_name(&self) -> String;

    /// Tear down the surface; no further events are raised afterwards
    fn close(&self);

    fn as_any(&self) -> &dyn Any;
}

/// One navigable sub-surface
pub trait FrameBackend {
    fn id(&self) -> FrameId;
    fn name(&self) -> String;
    fn execute_script(&self, script: &str, callback: ScriptCallback);
    fn post_web_message(&self, message: &str, as_json: bool);
}

pub trait CookieStore {
    fn cookies(&self, url: &str, callback: CookiesCallback);
    fn set_cookie(&self, cookie: &Cookie) -> BridgeResult<()>;
    fn delete_cookies(&self, name: &str, url: &str);
    fn delete_all_cookies(&self);
}

pub trait ExtensionBackend {
    fn id(&self) -> String;
    fn name(&self) -> String;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn remove(&self);
}

// ============================================================================
// Deferred requests
// ============================================================================

/// Single-use capability that lets a paused engine request proceed
pub trait Deferral {
    fn complete(self: Box<Self>);
}

pub trait NewWindowArgs {
    fn uri(&self) -> String;
    fn is_user_gesture(&self) -> bool;
    fn window_features(&self) -> WindowFeatures;
    /// Host the new window in an existing surface
    fn set_new_window(&self, target: &Rc<dyn WebViewBackend>) -> BridgeResult<()>;
    fn set_handled(&self, handled: bool);
}

pub trait ScriptDialogArgs {
    fn url(&self) -> String;
    fn kind(&self) -> ScriptDialogKind;
    fn message(&self) -> String;
    fn default_text(&self) -> String;
    fn accept(&self);
    fn set_result_text(&self, text: &str);
}

pub trait PermissionArgs {
    fn url(&self) -> String;
    fn kind(&self) -> PermissionKind;
    fn is_user_gesture(&self) -> bool;
    fn set_state(&self, state: PermissionState);
    fn set_handled(&self, handled: bool);
}

pub trait ContextMenuArgs {
    fn target(&self) -> ContextMenuTarget;
    fn location(&self) -> (i32, i32);
    fn set_selected_command(&self, command_id: i32);
    fn set_handled(&self, handled: bool);
    fn menu_items(&self) -> Rc<dyn MenuCollectionBackend>;
    fn create_item(
        &self,
        label: &str,
        icon: Option<&[u8]>,
        kind: MenuItemKind,
    ) -> BridgeResult<Rc<dyn MenuItemBackend>>;
}

pub trait MenuCollectionBackend {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Option<Rc<dyn MenuItemBackend>>;
    fn remove(&self, index: usize) -> BridgeResult<()>;
    fn insert(&self, index: usize, item: Rc<dyn MenuItemBackend>) -> BridgeResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait MenuItemBackend {
    fn name(&self) -> String;
    fn label(&self) -> String;
    fn command_id(&self) -> i32;
    fn shortcut(&self) -> String;
    /// PNG bytes, if the item has an icon
    fn icon(&self) -> Option<Vec<u8>>;
    fn kind(&self) -> MenuItemKind;
    fn children(&self) -> Option<Rc<dyn MenuCollectionBackend>>;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn is_checked(&self) -> bool;
    fn set_checked(&self, checked: bool);
}

pub trait BasicAuthArgs {
    fn uri(&self) -> String;
    fn challenge(&self) -> String;
    fn set_credentials(&self, user: &str, password: &str);
    fn set_cancel(&self, cancel: bool);
}

pub trait DownloadStartingArgs {
    fn operation(&self) -> Rc<dyn DownloadBackend>;
    fn set_cancel(&self, cancel: bool);
    fn result_path(&self) -> String;
    fn set_result_path(&self, path: &str);
    fn set_handled(&self, handled: bool);
}

pub trait DownloadBackend {
    fn cancel(&self);
    fn pause(&self);
    fn resume(&self);
    fn can_resume(&self) -> bool;
    fn state(&self) -> DownloadState;
    fn uri(&self) -> String;
    fn result_path(&self) -> String;
    fn mime_type(&self) -> String;
    fn content_disposition(&self) -> String;
    fn total_bytes(&self) -> i64;
    fn received_bytes(&self) -> i64;
    fn estimated_end_time(&self) -> String;
}

// ============================================================================
// Engine -> bridge notifications
// ============================================================================

/// Notifications the engine raises on the owner thread for one browsing surface
///
/// Request-style notifications carry the engine's [`Deferral`]; the engine waits until
/// it is completed (or dropped). The two methods returning `bool` are answered inline.
pub trait EngineEvents {
    fn frame_created(&self, frame: Rc<dyn FrameBackend>);
    fn frame_destroyed(&self, id: FrameId);
    fn frame_navigation_starting(&self, id: FrameId, url: &str);
    fn frame_web_message(&self, id: FrameId, source: &str, message: &str);

    fn close_requested(&self);
    fn new_window_requested(&self, args: Rc<dyn NewWindowArgs>, deferral: Box<dyn Deferral>);
    fn title_changed(&self, title: &str);
    fn fullscreen_changed(&self, fullscreen: bool);
    /// Return `true` to cancel the navigation
    fn navigation_starting(&self, navigation: &NavigationStarting) -> bool;
    fn content_loading(&self, is_error_page: bool, navigation_id: u64);
    fn source_changed(&self, is_new_document: bool);
    fn history_changed(&self);
    fn navigation_completed(&self, success: bool, status: i32, navigation_id: u64);
    fn script_dialog(&self, args: Rc<dyn ScriptDialogArgs>, deferral: Box<dyn Deferral>);
    fn context_menu_requested(&self, args: Rc<dyn ContextMenuArgs>, deferral: Box<dyn Deferral>);
    fn context_menu_item_selected(&self, item: Rc<dyn MenuItemBackend>);
    fn permission_requested(&self, args: Rc<dyn PermissionArgs>, deferral: Box<dyn Deferral>);
    /// Return `true` if the key was handled
    fn key_event(&self, key: &KeyEvent) -> bool;
    fn basic_auth_requested(&self, args: Rc<dyn BasicAuthArgs>, deferral: Box<dyn Deferral>);
    fn web_message_received(&self, source: &str, message: &str);
    fn download_starting(&self, args: Rc<dyn DownloadStartingArgs>, deferral: Box<dyn Deferral>);
    fn favicon_changed(&self, url: &str);
    fn audio_state_changed(&self, playing: bool);
    fn status_text_changed(&self, text: &str);
    /// A subscribed protocol event; `params` is JSON
    fn protocol_event(&self, method: &str, params: &str);
}
