use super::EngineRequest;
use crate::browser::{Browser, BrowserObject};
use crate::engine::{
    ContextMenuArgs, ContextMenuTarget, MenuCollectionBackend, MenuItemBackend, MenuItemKind,
};
use crate::error::{BridgeError, BridgeResult};
use std::rc::Rc;
use std::sync::Arc;

/// A context menu is about to be shown
pub struct ContextMenuRequest {
    request: Arc<EngineRequest<dyn ContextMenuArgs>>,
}

impl ContextMenuRequest {
    pub(crate) fn new(request: Arc<EngineRequest<dyn ContextMenuArgs>>) -> Arc<Self> {
        Arc::new(Self { request })
    }

    pub fn target(&self) -> BridgeResult<ContextMenuTarget> {
        self.request.query(|args| args.target())
    }

    /// Where the menu was requested, in surface coordinates
    pub fn location(&self) -> BridgeResult<(i32, i32)> {
        self.request.query(|args| args.location())
    }

    /// Command to run when the menu is resolved as handled
    pub fn set_selected_command(&self, command_id: i32) -> BridgeResult<()> {
        self.request
            .mutate("context_menu.set_selected_command", move |args| {
                args.set_selected_command(command_id)
            })
    }

    /// The editable list of entries
    pub fn menu_items(&self) -> BridgeResult<Arc<MenuCollection>> {
        let browser = self.request.resolution().ensure_pending()?;
        let request = self.request.clone();
        self.request.bridge().call_and_wait(move || {
            let items = request.args()?.menu_items();
            MenuCollection::wrap(&browser, items)
        })?
    }

    /// Create a custom entry; insert it through [`MenuCollection::insert`]
    pub fn create_item(
        &self,
        label: impl Into<String>,
        icon: Option<Vec<u8>>,
        kind: MenuItemKind,
    ) -> BridgeResult<Arc<MenuItem>> {
        let browser = self.request.resolution().ensure_pending()?;
        let label = label.into();
        let request = self.request.clone();
        self.request.bridge().call_and_wait(move || {
            let item = request
                .args()?
                .create_item(&label, icon.as_deref(), kind)?;
            MenuItem::wrap(&browser, item)
        })?
    }

    /// Resolve the request; `handled = false` shows the default menu
    pub fn process(&self, handled: bool) -> BridgeResult<()> {
        self.request
            .resolve("context_menu.process", move |args| args.set_handled(handled))
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }
}

impl std::fmt::Debug for ContextMenuRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextMenuRequest")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Ordered list of context menu entries
pub struct MenuCollection {
    object: BrowserObject<dyn MenuCollectionBackend>,
}

impl MenuCollection {
    pub(crate) fn wrap(browser: &Arc<Browser>, items: Rc<dyn MenuCollectionBackend>) -> BridgeResult<Arc<Self>> {
        Ok(Arc::new(Self {
            object: BrowserObject::new(browser, items)?,
        }))
    }

    pub fn len(&self) -> BridgeResult<usize> {
        self.object.query(|items| items.len())
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        self.object.query(|items| items.is_empty())
    }

    pub fn get(&self, index: usize) -> BridgeResult<Arc<MenuItem>> {
        let browser = self.object.browser()?;
        self.object.query_with(move |items| {
            let item = items.get(index).ok_or_else(|| {
                BridgeError::invalid_argument(format!("menu index {} out of range", index))
            })?;
            MenuItem::wrap(&browser, item)
        })
    }

    pub fn remove(&self, index: usize) -> BridgeResult<()> {
        self.object.query_with(move |items| items.remove(index))
    }

    pub fn insert(&self, index: usize, item: &Arc<MenuItem>) -> BridgeResult<()> {
        let item = item.clone();
        self.object.query_with(move |items| {
            let raw = item.object.get()?.clone();
            items.insert(index, raw)
        })
    }

    /// Every entry, in order
    pub fn items(&self) -> BridgeResult<Vec<Arc<MenuItem>>> {
        let browser = self.object.browser()?;
        self.object.query_with(move |items| {
            (0..items.len())
                .filter_map(|index| items.get(index))
                .map(|item| MenuItem::wrap(&browser, item))
                .collect()
        })
    }
}

impl std::fmt::Debug for MenuCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuCollection").finish_non_exhaustive()
    }
}

/// One context menu entry
pub struct MenuItem {
    object: BrowserObject<dyn MenuItemBackend>,
}

impl MenuItem {
    pub(crate) fn wrap(browser: &Arc<Browser>, item: Rc<dyn MenuItemBackend>) -> BridgeResult<Arc<Self>> {
        Ok(Arc::new(Self {
            object: BrowserObject::new(browser, item)?,
        }))
    }

    pub fn name(&self) -> BridgeResult<String> {
        self.object.query(|item| item.name())
    }

    pub fn label(&self) -> BridgeResult<String> {
        self.object.query(|item| item.label())
    }

    pub fn command_id(&self) -> BridgeResult<i32> {
        self.object.query(|item| item.command_id())
    }

    pub fn shortcut(&self) -> BridgeResult<String> {
        self.object.query(|item| item.shortcut())
    }

    /// PNG icon bytes
    pub fn icon(&self) -> BridgeResult<Option<Vec<u8>>> {
        self.object.query(|item| item.icon())
    }

    pub fn kind(&self) -> BridgeResult<MenuItemKind> {
        self.object.query(|item| item.kind())
    }

    /// Sub-menu entries, for submenu items
    pub fn children(&self) -> BridgeResult<Option<Arc<MenuCollection>>> {
        let browser = self.object.browser()?;
        self.object.query_with(move |item| match item.children() {
            Some(children) => MenuCollection::wrap(&browser, children).map(Some),
            None => Ok(None),
        })
    }

    pub fn is_enabled(&self) -> BridgeResult<bool> {
        self.object.query(|item| item.is_enabled())
    }

    pub fn set_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.object
            .post("menu_item.set_enabled", move |item| item.set_enabled(enabled))
    }

    pub fn is_checked(&self) -> BridgeResult<bool> {
        self.object.query(|item| item.is_checked())
    }

    pub fn set_checked(&self, checked: bool) -> BridgeResult<()> {
        self.object
            .post("menu_item.set_checked", move |item| item.set_checked(checked))
    }
}

impl std::fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuItem").finish_non_exhaustive()
    }
}
