//! Arguments of engine-initiated requests
//!
//! Each request records the embedder's final choice in the probe when its deferral is
//! completed, so tests can assert on the outcome after the fact.

use super::probe::{HeadlessProbe, ProbeRecord};
use super::webview::HeadlessWebView;
use crate::engine::{
    BasicAuthArgs, ContextMenuArgs, ContextMenuTarget, ContextMenuTargetKind, Deferral,
    DownloadBackend, DownloadStartingArgs, DownloadState, MenuCollectionBackend, MenuItemBackend,
    MenuItemKind, NewWindowArgs, PermissionArgs, PermissionKind, PermissionState,
    ScriptDialogArgs, ScriptDialogKind, WebViewBackend, WindowFeatures,
};
use crate::error::{BridgeError, BridgeResult};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// State an embedder can leave on request arguments
pub(crate) trait Snapshot {
    fn snapshot(&self) -> Value;
}

pub(crate) struct HeadlessDeferral {
    request: &'static str,
    probe: HeadlessProbe,
    args: Rc<dyn Snapshot>,
    completed: bool,
}

impl HeadlessDeferral {
    pub(crate) fn new(request: &'static str, probe: &HeadlessProbe, args: Rc<dyn Snapshot>) -> Box<Self> {
        Box::new(Self {
            request,
            probe: probe.clone(),
            args,
            completed: false,
        })
    }
}

impl Deferral for HeadlessDeferral {
    fn complete(mut self: Box<Self>) {
        self.completed = true;
        self.probe.record(ProbeRecord::RequestCompleted {
            request: self.request,
            outcome: self.args.snapshot(),
        });
    }
}

impl Drop for HeadlessDeferral {
    fn drop(&mut self) {
        if !self.completed {
            self.probe.record(ProbeRecord::RequestDropped {
                request: self.request,
            });
        }
    }
}

// ----------------------------------------------------------------------------
// New window
// ----------------------------------------------------------------------------

pub struct HeadlessNewWindowArgs {
    uri: String,
    features: WindowFeatures,
    handled: Cell<bool>,
    hosted: Cell<bool>,
}

impl HeadlessNewWindowArgs {
    pub fn new(uri: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            uri: uri.into(),
            features: WindowFeatures::default(),
            handled: Cell::new(false),
            hosted: Cell::new(false),
        })
    }
}

impl NewWindowArgs for HeadlessNewWindowArgs {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn is_user_gesture(&self) -> bool {
        true
    }

    fn window_features(&self) -> WindowFeatures {
        self.features
    }

    fn set_new_window(&self, target: &Rc<dyn WebViewBackend>) -> BridgeResult<()> {
        let target = target
            .as_any()
            .downcast_ref::<HeadlessWebView>()
            .ok_or_else(|| BridgeError::invalid_argument("target surface belongs to another engine"))?;
        if target.is_closed() {
            return Err(BridgeError::invalid_state("target surface is closed"));
        }
        self.hosted.set(true);
        Ok(())
    }

    fn set_handled(&self, handled: bool) {
        self.handled.set(handled);
    }
}

impl Snapshot for HeadlessNewWindowArgs {
    fn snapshot(&self) -> Value {
        json!({ "handled": self.handled.get(), "hosted": self.hosted.get() })
    }
}

// ----------------------------------------------------------------------------
// Script dialog
// ----------------------------------------------------------------------------

pub struct HeadlessDialogArgs {
    url: String,
    kind: ScriptDialogKind,
    message: String,
    default_text: String,
    accepted: Cell<bool>,
    result_text: RefCell<String>,
}

impl HeadlessDialogArgs {
    pub fn new(url: &str, kind: ScriptDialogKind, message: &str, default_text: &str) -> Rc<Self> {
        Rc::new(Self {
            url: url.to_string(),
            kind,
            message: message.to_string(),
            default_text: default_text.to_string(),
            accepted: Cell::new(false),
            result_text: RefCell::new(String::new()),
        })
    }
}

impl ScriptDialogArgs for HeadlessDialogArgs {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn kind(&self) -> ScriptDialogKind {
        self.kind
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn default_text(&self) -> String {
        self.default_text.clone()
    }

    fn accept(&self) {
        self.accepted.set(true);
    }

    fn set_result_text(&self, text: &str) {
        *self.result_text.borrow_mut() = text.to_string();
    }
}

impl Snapshot for HeadlessDialogArgs {
    fn snapshot(&self) -> Value {
        json!({ "accepted": self.accepted.get(), "result_text": *self.result_text.borrow() })
    }
}

// ----------------------------------------------------------------------------
// Permission
// ----------------------------------------------------------------------------

pub struct HeadlessPermissionArgs {
    url: String,
    kind: PermissionKind,
    state: Cell<PermissionState>,
    handled: Cell<bool>,
}

impl HeadlessPermissionArgs {
    pub fn new(url: &str, kind: PermissionKind) -> Rc<Self> {
        Rc::new(Self {
            url: url.to_string(),
            kind,
            state: Cell::new(PermissionState::Default),
            handled: Cell::new(false),
        })
    }
}

impl PermissionArgs for HeadlessPermissionArgs {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn kind(&self) -> PermissionKind {
        self.kind
    }

    fn is_user_gesture(&self) -> bool {
        false
    }

    fn set_state(&self, state: PermissionState) {
        self.state.set(state);
    }

    fn set_handled(&self, handled: bool) {
        self.handled.set(handled);
    }
}

impl Snapshot for HeadlessPermissionArgs {
    fn snapshot(&self) -> Value {
        json!({ "state": self.state.get(), "handled": self.handled.get() })
    }
}

// ----------------------------------------------------------------------------
// Context menu
// ----------------------------------------------------------------------------

pub struct HeadlessMenuItem {
    label: String,
    command_id: i32,
    icon: Option<Vec<u8>>,
    kind: MenuItemKind,
    children: Option<Rc<HeadlessMenuCollection>>,
    enabled: Cell<bool>,
    checked: Cell<bool>,
}

impl HeadlessMenuItem {
    pub fn new(label: &str, command_id: i32, kind: MenuItemKind) -> Rc<Self> {
        Rc::new(Self {
            label: label.to_string(),
            command_id,
            icon: None,
            kind,
            children: (kind == MenuItemKind::Submenu).then(HeadlessMenuCollection::new),
            enabled: Cell::new(true),
            checked: Cell::new(false),
        })
    }
}

impl MenuItemBackend for HeadlessMenuItem {
    fn name(&self) -> String {
        self.label.to_lowercase().replace(' ', "_")
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn command_id(&self) -> i32 {
        self.command_id
    }

    fn shortcut(&self) -> String {
        String::new()
    }

    fn icon(&self) -> Option<Vec<u8>> {
        self.icon.clone()
    }

    fn kind(&self) -> MenuItemKind {
        self.kind
    }

    fn children(&self) -> Option<Rc<dyn MenuCollectionBackend>> {
        self.children
            .clone()
            .map(|children| children as Rc<dyn MenuCollectionBackend>)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn is_checked(&self) -> bool {
        self.checked.get()
    }

    fn set_checked(&self, checked: bool) {
        self.checked.set(checked);
    }
}

#[derive(Default)]
pub struct HeadlessMenuCollection {
    items: RefCell<Vec<Rc<dyn MenuItemBackend>>>,
}

impl HeadlessMenuCollection {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn labels(&self) -> Vec<String> {
        self.items.borrow().iter().map(|item| item.label()).collect()
    }
}

impl MenuCollectionBackend for HeadlessMenuCollection {
    fn len(&self) -> usize {
        self.items.borrow().len()
    }

    fn get(&self, index: usize) -> Option<Rc<dyn MenuItemBackend>> {
        self.items.borrow().get(index).cloned()
    }

    fn remove(&self, index: usize) -> BridgeResult<()> {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            return Err(BridgeError::invalid_argument(format!("no menu item at {}", index)));
        }
        items.remove(index);
        Ok(())
    }

    fn insert(&self, index: usize, item: Rc<dyn MenuItemBackend>) -> BridgeResult<()> {
        let mut items = self.items.borrow_mut();
        if index > items.len() {
            return Err(BridgeError::invalid_argument(format!(
                "menu index {} past end {}",
                index,
                items.len()
            )));
        }
        items.insert(index, item);
        Ok(())
    }
}

pub struct HeadlessContextMenuArgs {
    target: ContextMenuTarget,
    location: (i32, i32),
    items: Rc<HeadlessMenuCollection>,
    selected: Cell<i32>,
    handled: Cell<bool>,
    next_command: Cell<i32>,
}

impl HeadlessContextMenuArgs {
    /// A page menu at `location` with the usual navigation entries
    pub fn new(page_uri: &str, location: (i32, i32)) -> Rc<Self> {
        let items = HeadlessMenuCollection::new();
        for (index, label) in ["Back", "Reload", "Inspect"].into_iter().enumerate() {
            let item = HeadlessMenuItem::new(label, index as i32 + 1, MenuItemKind::Command);
            let _ = items.insert(index, item);
        }
        Rc::new(Self {
            target: ContextMenuTarget {
                kind: ContextMenuTargetKind::Page,
                is_editable: false,
                is_requested_for_main_frame: true,
                page_uri: page_uri.to_string(),
                frame_uri: page_uri.to_string(),
                link_uri: None,
                link_text: None,
                source_uri: None,
                selection_text: None,
            },
            location,
            items,
            selected: Cell::new(-1),
            handled: Cell::new(false),
            next_command: Cell::new(100),
        })
    }
}

impl ContextMenuArgs for HeadlessContextMenuArgs {
    fn target(&self) -> ContextMenuTarget {
        self.target.clone()
    }

    fn location(&self) -> (i32, i32) {
        self.location
    }

    fn set_selected_command(&self, command_id: i32) {
        self.selected.set(command_id);
    }

    fn set_handled(&self, handled: bool) {
        self.handled.set(handled);
    }

    fn menu_items(&self) -> Rc<dyn MenuCollectionBackend> {
        self.items.clone()
    }

    fn create_item(
        &self,
        label: &str,
        icon: Option<&[u8]>,
        kind: MenuItemKind,
    ) -> BridgeResult<Rc<dyn MenuItemBackend>> {
        if label.is_empty() && kind != MenuItemKind::Separator {
            return Err(BridgeError::invalid_argument("menu item needs a label"));
        }
        let command_id = self.next_command.get();
        self.next_command.set(command_id + 1);
        let mut item = HeadlessMenuItem {
            label: label.to_string(),
            command_id,
            icon: None,
            kind,
            children: (kind == MenuItemKind::Submenu).then(HeadlessMenuCollection::new),
            enabled: Cell::new(true),
            checked: Cell::new(false),
        };
        item.icon = icon.map(<[u8]>::to_vec);
        Ok(Rc::new(item))
    }
}

impl Snapshot for HeadlessContextMenuArgs {
    fn snapshot(&self) -> Value {
        json!({
            "selected_command": self.selected.get(),
            "handled": self.handled.get(),
            "items": self.items.labels(),
        })
    }
}

// ----------------------------------------------------------------------------
// Basic auth
// ----------------------------------------------------------------------------

pub struct HeadlessAuthArgs {
    uri: String,
    challenge: String,
    credentials: RefCell<Option<(String, String)>>,
    cancel: Cell<bool>,
}

impl HeadlessAuthArgs {
    pub fn new(uri: &str, challenge: &str) -> Rc<Self> {
        Rc::new(Self {
            uri: uri.to_string(),
            challenge: challenge.to_string(),
            credentials: RefCell::new(None),
            cancel: Cell::new(false),
        })
    }
}

impl BasicAuthArgs for HeadlessAuthArgs {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn challenge(&self) -> String {
        self.challenge.clone()
    }

    fn set_credentials(&self, user: &str, password: &str) {
        *self.credentials.borrow_mut() = Some((user.to_string(), password.to_string()));
    }

    fn set_cancel(&self, cancel: bool) {
        self.cancel.set(cancel);
    }
}

impl Snapshot for HeadlessAuthArgs {
    fn snapshot(&self) -> Value {
        let credentials = self.credentials.borrow();
        json!({
            "user": credentials.as_ref().map(|(user, _)| user.clone()),
            "password": credentials.as_ref().map(|(_, password)| password.clone()),
            "cancel": self.cancel.get(),
        })
    }
}

// ----------------------------------------------------------------------------
// Downloads
// ----------------------------------------------------------------------------

pub struct HeadlessDownload {
    uri: String,
    result_path: String,
    state: Cell<DownloadState>,
    paused: Cell<bool>,
    total_bytes: i64,
    received_bytes: Cell<i64>,
}

impl HeadlessDownload {
    pub fn new(uri: &str, result_path: &str, total_bytes: i64) -> Rc<Self> {
        Rc::new(Self {
            uri: uri.to_string(),
            result_path: result_path.to_string(),
            state: Cell::new(DownloadState::InProgress),
            paused: Cell::new(false),
            total_bytes,
            received_bytes: Cell::new(0),
        })
    }
}

impl DownloadBackend for HeadlessDownload {
    fn cancel(&self) {
        self.state.set(DownloadState::Interrupted);
    }

    fn pause(&self) {
        if self.state.get() == DownloadState::InProgress {
            self.paused.set(true);
        }
    }

    fn resume(&self) {
        if self.can_resume() {
            self.paused.set(false);
            self.received_bytes.set(self.total_bytes);
            self.state.set(DownloadState::Completed);
        }
    }

    fn can_resume(&self) -> bool {
        self.paused.get() && self.state.get() == DownloadState::InProgress
    }

    fn state(&self) -> DownloadState {
        self.state.get()
    }

    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn result_path(&self) -> String {
        self.result_path.clone()
    }

    fn mime_type(&self) -> String {
        "application/octet-stream".to_string()
    }

    fn content_disposition(&self) -> String {
        String::new()
    }

    fn total_bytes(&self) -> i64 {
        self.total_bytes
    }

    fn received_bytes(&self) -> i64 {
        self.received_bytes.get()
    }

    fn estimated_end_time(&self) -> String {
        String::new()
    }
}

pub struct HeadlessDownloadArgs {
    operation: Rc<HeadlessDownload>,
    cancel: Cell<bool>,
    result_path: RefCell<String>,
    handled: Cell<bool>,
}

impl HeadlessDownloadArgs {
    pub fn new(uri: &str) -> Rc<Self> {
        let file = uri.rsplit('/').next().filter(|name| !name.is_empty()).unwrap_or("download");
        let result_path = format!("downloads/{}", file);
        Rc::new(Self {
            operation: HeadlessDownload::new(uri, &result_path, 1024),
            cancel: Cell::new(false),
            result_path: RefCell::new(result_path),
            handled: Cell::new(false),
        })
    }
}

impl DownloadStartingArgs for HeadlessDownloadArgs {
    fn operation(&self) -> Rc<dyn DownloadBackend> {
        self.operation.clone()
    }

    fn set_cancel(&self, cancel: bool) {
        self.cancel.set(cancel);
    }

    fn result_path(&self) -> String {
        self.result_path.borrow().clone()
    }

    fn set_result_path(&self, path: &str) {
        *self.result_path.borrow_mut() = path.to_string();
    }

    fn set_handled(&self, handled: bool) {
        self.handled.set(handled);
    }
}

impl Snapshot for HeadlessDownloadArgs {
    fn snapshot(&self) -> Value {
        json!({
            "cancel": self.cancel.get(),
            "result_path": *self.result_path.borrow(),
            "handled": self.handled.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferral_records_outcome_once() {
        let probe = HeadlessProbe::new();
        let args = HeadlessDialogArgs::new("https://a.test", ScriptDialogKind::Prompt, "name?", "");
        args.accept();
        args.set_result_text("Ada");

        HeadlessDeferral::new("script_dialog", &probe, args.clone()).complete();
        assert_eq!(
            probe.completions(),
            vec![("script_dialog", json!({ "accepted": true, "result_text": "Ada" }))]
        );
        assert_eq!(probe.records().len(), 1);
    }

    #[test]
    fn test_dropped_deferral_is_recorded() {
        let probe = HeadlessProbe::new();
        drop(HeadlessDeferral::new(
            "permission",
            &probe,
            HeadlessPermissionArgs::new("https://a.test", PermissionKind::Camera),
        ));
        assert_eq!(
            probe.records(),
            vec![ProbeRecord::RequestDropped { request: "permission" }]
        );
    }

    #[test]
    fn test_menu_collection_bounds() {
        let menu = HeadlessContextMenuArgs::new("https://a.test", (4, 8));
        let items = menu.menu_items();
        assert_eq!(items.len(), 3);

        let extra = menu.create_item("Translate", None, MenuItemKind::Command).unwrap();
        assert!(items.insert(9, extra.clone()).is_err());
        items.insert(3, extra).unwrap();
        items.remove(0).unwrap();
        assert_eq!(menu.items.labels(), vec!["Reload", "Inspect", "Translate"]);
        assert!(menu.create_item("", None, MenuItemKind::Command).is_err());
    }

    #[test]
    fn test_download_pause_resume() {
        let download = HeadlessDownload::new("https://a.test/file.zip", "downloads/file.zip", 10);
        assert!(!download.can_resume());
        download.pause();
        assert!(download.can_resume());
        download.resume();
        assert_eq!(download.state(), DownloadState::Completed);
        assert_eq!(download.received_bytes(), 10);
    }
}
