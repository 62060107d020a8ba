//! Browser events
//!
//! The engine raises notifications on the owner thread. The bridge turns each one into
//! a [`BrowserEvent`] and posts it to the browser's [`BrowserEventHandler`], so handlers
//! always run after the engine callback has returned and in the order the engine raised
//! them.
//!
//! Two notifications are answered instead of delivered: navigation starting and
//! accelerator keys run the handler inline, because the engine needs the answer
//! (cancel / handled) before it continues.

use crate::browser::Browser;
use crate::deferred::{
    BasicAuthRequest, ContextMenuRequest, DownloadRequest, EngineRequest, InterceptedRequest,
    MenuItem, NewWindowRequest, PermissionInfo, PermissionRequest, RequestIntercept,
    ResponseIntercept, ScriptDialogInfo, ScriptDialogRequest,
};
use crate::engine::{
    BasicAuthArgs, ContextMenuArgs, Deferral, DownloadStartingArgs, EngineEvents, FrameBackend,
    FrameId, KeyEvent, MenuItemBackend, NavigationStarting, NewWindowArgs, PermissionArgs,
    ScriptDialogArgs,
};
use crate::frame::Frame;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Protocol event carrying network interception
pub const REQUEST_PAUSED_EVENT: &str = "Fetch.requestPaused";
/// Protocol event carrying console output
pub const CONSOLE_MESSAGE_EVENT: &str = "Console.messageAdded";
/// Protocol event carrying file chooser requests
pub const FILE_CHOOSER_EVENT: &str = "Page.fileChooserOpened";

/// Stable event numbers used at the C boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum EventKind {
    Created = 0,
    CloseRequested = 1,
    NewWindowRequested = 2,
    TitleChanged = 3,
    FullscreenChanged = 4,
    NavigationStarting = 5,
    ContentLoading = 6,
    SourceChanged = 7,
    HistoryChanged = 8,
    NavigationCompleted = 9,
    ScriptDialog = 10,
    ContextMenuRequested = 11,
    ContextMenuItemSelected = 12,
    PermissionRequested = 13,
    RequestIntercepted = 14,
    ResponseIntercepted = 15,
    KeyEvent = 16,
    BasicAuthRequested = 17,
    WebMessageReceived = 18,
    FileChooserRequested = 19,
    ConsoleMessage = 20,
    DownloadStarting = 21,
    FaviconChanged = 22,
    AudioStateChanged = 23,
    StatusTextChanged = 24,
}

impl EventKind {
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Whether the handler's answer is returned to the engine
    pub fn is_inline(self) -> bool {
        matches!(self, EventKind::NavigationStarting | EventKind::KeyEvent)
    }
}

/// A console entry reported by the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub source: String,
    pub level: String,
    pub text: String,
    pub url: Option<String>,
    pub line: i64,
    pub column: i64,
}

impl ConsoleMessage {
    /// Read a `Console.messageAdded` payload
    pub fn from_protocol(params: &Value) -> Option<Self> {
        let message = params.get("message")?;
        let text = |key: &str| {
            message
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let url = message.get("url").and_then(Value::as_str).map(str::to_string);
        let (line, column) = if url.is_some() {
            (
                message.get("line").and_then(Value::as_i64).unwrap_or(0),
                message.get("column").and_then(Value::as_i64).unwrap_or(0),
            )
        } else {
            (0, 0)
        };
        Some(Self {
            source: text("source"),
            level: text("level"),
            text: text("text"),
            url,
            line,
            column,
        })
    }
}

/// A page opened a file picker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChooser {
    pub frame_id: String,
    pub multiselect: bool,
    pub backend_node_id: i64,
}

impl FileChooser {
    /// Read a `Page.fileChooserOpened` payload
    pub fn from_protocol(params: &Value) -> Self {
        Self {
            frame_id: params
                .get("frameId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            multiselect: params.get("mode").and_then(Value::as_str) == Some("selectMultiple"),
            backend_node_id: params
                .get("backendNodeId")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        }
    }
}

/// Notification delivered to a [`BrowserEventHandler`]
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// The browser finished construction and can be driven
    Created,
    CloseRequested,
    NewWindowRequested(Arc<NewWindowRequest>),
    TitleChanged(String),
    FullscreenChanged(bool),
    ContentLoading {
        is_error_page: bool,
        navigation_id: u64,
    },
    SourceChanged {
        is_new_document: bool,
    },
    HistoryChanged,
    NavigationCompleted {
        success: bool,
        http_status: i32,
        navigation_id: u64,
    },
    ScriptDialog(Arc<ScriptDialogRequest>),
    ContextMenuRequested(Arc<ContextMenuRequest>),
    ContextMenuItemSelected(Arc<MenuItem>),
    PermissionRequested(Arc<PermissionRequest>),
    RequestIntercepted(Arc<RequestIntercept>),
    ResponseIntercepted(Arc<ResponseIntercept>),
    BasicAuthRequested(Arc<BasicAuthRequest>),
    /// `frame` is `None` for messages posted by the main document
    WebMessageReceived {
        frame: Option<Arc<Frame>>,
        source: String,
        message: String,
    },
    FileChooserRequested(FileChooser),
    ConsoleMessage(ConsoleMessage),
    DownloadStarting(Arc<DownloadRequest>),
    FaviconChanged(String),
    AudioStateChanged(bool),
    StatusTextChanged(String),
}

impl BrowserEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BrowserEvent::Created => EventKind::Created,
            BrowserEvent::CloseRequested => EventKind::CloseRequested,
            BrowserEvent::NewWindowRequested(_) => EventKind::NewWindowRequested,
            BrowserEvent::TitleChanged(_) => EventKind::TitleChanged,
            BrowserEvent::FullscreenChanged(_) => EventKind::FullscreenChanged,
            BrowserEvent::ContentLoading { .. } => EventKind::ContentLoading,
            BrowserEvent::SourceChanged { .. } => EventKind::SourceChanged,
            BrowserEvent::HistoryChanged => EventKind::HistoryChanged,
            BrowserEvent::NavigationCompleted { .. } => EventKind::NavigationCompleted,
            BrowserEvent::ScriptDialog(_) => EventKind::ScriptDialog,
            BrowserEvent::ContextMenuRequested(_) => EventKind::ContextMenuRequested,
            BrowserEvent::ContextMenuItemSelected(_) => EventKind::ContextMenuItemSelected,
            BrowserEvent::PermissionRequested(_) => EventKind::PermissionRequested,
            BrowserEvent::RequestIntercepted(_) => EventKind::RequestIntercepted,
            BrowserEvent::ResponseIntercepted(_) => EventKind::ResponseIntercepted,
            BrowserEvent::BasicAuthRequested(_) => EventKind::BasicAuthRequested,
            BrowserEvent::WebMessageReceived { .. } => EventKind::WebMessageReceived,
            BrowserEvent::FileChooserRequested(_) => EventKind::FileChooserRequested,
            BrowserEvent::ConsoleMessage(_) => EventKind::ConsoleMessage,
            BrowserEvent::DownloadStarting(_) => EventKind::DownloadStarting,
            BrowserEvent::FaviconChanged(_) => EventKind::FaviconChanged,
            BrowserEvent::AudioStateChanged(_) => EventKind::AudioStateChanged,
            BrowserEvent::StatusTextChanged(_) => EventKind::StatusTextChanged,
        }
    }
}

/// Receives the events of one browser.
///
/// All methods run on the owner thread.
pub trait BrowserEventHandler: Send + Sync {
    fn on_event(&self, browser: &Arc<Browser>, event: BrowserEvent);

    /// Return `true` to cancel the navigation
    fn on_navigation_starting(&self, _browser: &Arc<Browser>, _navigation: &NavigationStarting) -> bool {
        false
    }

    /// Return `true` if the key was handled
    fn on_key_event(&self, _browser: &Arc<Browser>, _key: &KeyEvent) -> bool {
        false
    }
}

/// Handler that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreEvents;

impl BrowserEventHandler for IgnoreEvents {
    fn on_event(&self, _browser: &Arc<Browser>, _event: BrowserEvent) {}
}

/// Handler that forwards events into a channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: Sender<BrowserEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, Receiver<BrowserEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl BrowserEventHandler for ChannelHandler {
    fn on_event(&self, _browser: &Arc<Browser>, event: BrowserEvent) {
        // The receiver may have been dropped; events are then discarded
        let _ = self.sender.send(event);
    }
}

/// A browser's single link to its handler
pub(crate) struct EventSink {
    handler: Arc<dyn BrowserEventHandler>,
}

impl EventSink {
    pub(crate) fn new(handler: Arc<dyn BrowserEventHandler>) -> Self {
        Self { handler }
    }

    /// Queue `event` for the handler
    pub(crate) fn deliver(&self, browser: &Arc<Browser>, event: BrowserEvent) {
        let handler = self.handler.clone();
        let target = browser.clone();
        browser.bridge().post(move || {
            let kind = event.kind();
            if target.is_destroyed() {
                trace!(browser = target.id(), ?kind, "Dropping event for destroyed browser");
                return;
            }
            trace!(browser = target.id(), ?kind, "Delivering event");
            handler.on_event(&target, event);
        });
    }

    pub(crate) fn navigation_starting(&self, browser: &Arc<Browser>, navigation: &NavigationStarting) -> bool {
        self.handler.on_navigation_starting(browser, navigation)
    }

    pub(crate) fn key_event(&self, browser: &Arc<Browser>, key: &KeyEvent) -> bool {
        self.handler.on_key_event(browser, key)
    }
}

/// The engine-facing side of one browser
pub(crate) struct BrowserEvents {
    browser: Weak<Browser>,
}

impl BrowserEvents {
    pub(crate) fn new(browser: &Arc<Browser>) -> Rc<Self> {
        Rc::new(Self {
            browser: Arc::downgrade(browser),
        })
    }

    fn browser(&self) -> Option<Arc<Browser>> {
        self.browser
            .upgrade()
            .filter(|browser| !browser.is_destroyed())
    }

    fn emit(&self, event: BrowserEvent) {
        match self.browser() {
            Some(browser) => browser.events().deliver(&browser, event),
            None => trace!(kind = ?event.kind(), "Engine event after browser destruction"),
        }
    }

    /// Wrap a deferred engine request into a token event.
    ///
    /// Without a live browser the deferral is completed at once so the engine does not
    /// wait forever.
    fn request<A: ?Sized + 'static>(
        &self,
        kind: EventKind,
        args: Rc<A>,
        deferral: Box<dyn Deferral>,
        wrap: impl FnOnce(&Rc<A>, Arc<EngineRequest<A>>) -> BrowserEvent,
    ) {
        let Some(browser) = self.browser() else {
            trace!(?kind, "Completing request for destroyed browser");
            deferral.complete();
            return;
        };
        match EngineRequest::new(&browser, args.clone(), deferral) {
            Ok(request) => browser.events().deliver(&browser, wrap(&args, request)),
            Err(e) => warn!(browser = browser.id(), ?kind, error = %e, "Failed to wrap engine request"),
        }
    }

    fn paused_request(&self, browser: &Arc<Browser>, params: &str) {
        let params: Value = match serde_json::from_str(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(browser = browser.id(), error = %e, "Malformed requestPaused payload");
                return;
            }
        };
        let request = match InterceptedRequest::from_paused_event(&params) {
            Ok(request) => request,
            Err(e) => {
                warn!(browser = browser.id(), error = %e, "Ignoring paused request");
                return;
            }
        };

        let is_response =
            params.get("responseStatusCode").is_some() || params.get("responseHeaders").is_some();
        let event = if is_response {
            BrowserEvent::ResponseIntercepted(ResponseIntercept::new(browser, request, &params))
        } else {
            BrowserEvent::RequestIntercepted(RequestIntercept::new(browser, request))
        };
        browser.events().deliver(browser, event);
    }
}

impl EngineEvents for BrowserEvents {
    fn frame_created(&self, frame: Rc<dyn FrameBackend>) {
        if let Some(browser) = self.browser() {
            if let Err(e) = browser.add_frame(frame) {
                warn!(browser = browser.id(), error = %e, "Failed to track frame");
            }
        }
    }

    fn frame_destroyed(&self, id: FrameId) {
        if let Some(browser) = self.browser() {
            if browser.remove_frame(id).is_none() {
                trace!(browser = browser.id(), frame = id, "Destroyed frame was not tracked");
            }
        }
    }

    fn frame_navigation_starting(&self, id: FrameId, url: &str) {
        if let Some(frame) = self.browser().and_then(|browser| browser.frame(id)) {
            frame.set_url(url);
        }
    }

    fn frame_web_message(&self, id: FrameId, source: &str, message: &str) {
        let frame = self.browser().and_then(|browser| browser.frame(id));
        self.emit(BrowserEvent::WebMessageReceived {
            frame,
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    fn close_requested(&self) {
        self.emit(BrowserEvent::CloseRequested);
    }

    fn new_window_requested(&self, args: Rc<dyn NewWindowArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::NewWindowRequested, args, deferral, |_, request| {
            BrowserEvent::NewWindowRequested(NewWindowRequest::new(request))
        });
    }

    fn title_changed(&self, title: &str) {
        self.emit(BrowserEvent::TitleChanged(title.to_string()));
    }

    fn fullscreen_changed(&self, fullscreen: bool) {
        self.emit(BrowserEvent::FullscreenChanged(fullscreen));
    }

    fn navigation_starting(&self, navigation: &NavigationStarting) -> bool {
        let Some(browser) = self.browser() else {
            return false;
        };
        let cancel = browser.events().navigation_starting(&browser, navigation);
        trace!(browser = browser.id(), url = %navigation.url, cancel, "Navigation starting");
        cancel
    }

    fn content_loading(&self, is_error_page: bool, navigation_id: u64) {
        self.emit(BrowserEvent::ContentLoading {
            is_error_page,
            navigation_id,
        });
    }

    fn source_changed(&self, is_new_document: bool) {
        self.emit(BrowserEvent::SourceChanged { is_new_document });
    }

    fn history_changed(&self) {
        self.emit(BrowserEvent::HistoryChanged);
    }

    fn navigation_completed(&self, success: bool, status: i32, navigation_id: u64) {
        self.emit(BrowserEvent::NavigationCompleted {
            success,
            http_status: status,
            navigation_id,
        });
    }

    fn script_dialog(&self, args: Rc<dyn ScriptDialogArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::ScriptDialog, args, deferral, |args, request| {
            let info = ScriptDialogInfo::capture(&**args);
            BrowserEvent::ScriptDialog(ScriptDialogRequest::new(request, info))
        });
    }

    fn context_menu_requested(&self, args: Rc<dyn ContextMenuArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::ContextMenuRequested, args, deferral, |_, request| {
            BrowserEvent::ContextMenuRequested(ContextMenuRequest::new(request))
        });
    }

    fn context_menu_item_selected(&self, item: Rc<dyn MenuItemBackend>) {
        let Some(browser) = self.browser() else {
            return;
        };
        match MenuItem::wrap(&browser, item) {
            Ok(item) => self.emit(BrowserEvent::ContextMenuItemSelected(item)),
            Err(e) => warn!(browser = browser.id(), error = %e, "Failed to wrap menu item"),
        }
    }

    fn permission_requested(&self, args: Rc<dyn PermissionArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::PermissionRequested, args, deferral, |args, request| {
            let info = PermissionInfo::capture(&**args);
            BrowserEvent::PermissionRequested(PermissionRequest::new(request, info))
        });
    }

    fn key_event(&self, key: &KeyEvent) -> bool {
        let Some(browser) = self.browser() else {
            return false;
        };
        browser.events().key_event(&browser, key)
    }

    fn basic_auth_requested(&self, args: Rc<dyn BasicAuthArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::BasicAuthRequested, args, deferral, |args, request| {
            BrowserEvent::BasicAuthRequested(BasicAuthRequest::new(
                request,
                args.uri(),
                args.challenge(),
            ))
        });
    }

    fn web_message_received(&self, source: &str, message: &str) {
        self.emit(BrowserEvent::WebMessageReceived {
            frame: None,
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    fn download_starting(&self, args: Rc<dyn DownloadStartingArgs>, deferral: Box<dyn Deferral>) {
        self.request(EventKind::DownloadStarting, args, deferral, |_, request| {
            BrowserEvent::DownloadStarting(DownloadRequest::new(request))
        });
    }

    fn favicon_changed(&self, url: &str) {
        self.emit(BrowserEvent::FaviconChanged(url.to_string()));
    }

    fn audio_state_changed(&self, playing: bool) {
        self.emit(BrowserEvent::AudioStateChanged(playing));
    }

    fn status_text_changed(&self, text: &str) {
        self.emit(BrowserEvent::StatusTextChanged(text.to_string()));
    }

    fn protocol_event(&self, method: &str, params: &str) {
        let Some(browser) = self.browser() else {
            return;
        };
        match method {
            REQUEST_PAUSED_EVENT => self.paused_request(&browser, params),
            CONSOLE_MESSAGE_EVENT => {
                let message = serde_json::from_str::<Value>(params)
                    .ok()
                    .and_then(|params| ConsoleMessage::from_protocol(&params));
                match message {
                    Some(message) => self.emit(BrowserEvent::ConsoleMessage(message)),
                    None => warn!(browser = browser.id(), "Malformed console message"),
                }
            }
            FILE_CHOOSER_EVENT => match serde_json::from_str::<Value>(params) {
                Ok(params) => self.emit(BrowserEvent::FileChooserRequested(
                    FileChooser::from_protocol(&params),
                )),
                Err(e) => warn!(browser = browser.id(), error = %e, "Malformed file chooser payload"),
            },
            other => trace!(browser = browser.id(), method = other, "Unhandled protocol event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_ids_are_stable() {
        assert_eq!(EventKind::Created.id(), 0);
        assert_eq!(EventKind::NavigationStarting.id(), 5);
        assert_eq!(EventKind::KeyEvent.id(), 16);
        assert_eq!(EventKind::WebMessageReceived.id(), 18);
        assert_eq!(EventKind::ConsoleMessage.id(), 20);
        assert_eq!(EventKind::StatusTextChanged.id(), 24);
        assert!(EventKind::NavigationStarting.is_inline());
        assert!(!EventKind::TitleChanged.is_inline());
    }

    #[test]
    fn test_console_message_from_protocol() {
        let params = json!({
            "message": {
                "source": "console-api",
                "level": "warning",
                "text": "careful",
                "url": "https://example.com/app.js",
                "line": 12,
                "column": 4
            }
        });
        let message = ConsoleMessage::from_protocol(&params).unwrap();
        assert_eq!(message.level, "warning");
        assert_eq!(message.url.as_deref(), Some("https://example.com/app.js"));
        assert_eq!((message.line, message.column), (12, 4));

        let bare = json!({ "message": { "source": "network", "level": "error", "text": "x" } });
        let message = ConsoleMessage::from_protocol(&bare).unwrap();
        assert_eq!(message.url, None);
        assert_eq!((message.line, message.column), (0, 0));

        assert!(ConsoleMessage::from_protocol(&json!({})).is_none());
    }

    #[test]
    fn test_file_chooser_from_protocol() {
        let chooser = FileChooser::from_protocol(&json!({
            "frameId": "F1",
            "mode": "selectMultiple",
            "backendNodeId": 31
        }));
        assert_eq!(chooser.frame_id, "F1");
        assert!(chooser.multiselect);
        assert_eq!(chooser.backend_node_id, 31);
    }

    #[test]
    fn test_channel_handler_is_shareable() {
        fn assert_handler<T: BrowserEventHandler>() {}
        assert_handler::<ChannelHandler>();
        assert_handler::<IgnoreEvents>();
    }
}
