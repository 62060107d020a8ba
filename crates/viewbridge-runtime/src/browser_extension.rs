use crate::browser::{Browser, BrowserObject};
use crate::engine::ExtensionBackend;
use crate::error::BridgeResult;
use std::rc::Rc;
use std::sync::Arc;

/// An extension loaded into a browser's profile
pub struct BrowserExtension {
    object: BrowserObject<dyn ExtensionBackend>,
    id: String,
    name: String,
}

impl BrowserExtension {
    /// Wrap an engine extension; owner thread only
    pub(crate) fn wrap(browser: &Arc<Browser>, extension: Rc<dyn ExtensionBackend>) -> BridgeResult<Arc<Self>> {
        let id = extension.id();
        let name = extension.name();
        Ok(Arc::new(Self {
            object: BrowserObject::new(browser, extension)?,
            id,
            name,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> BridgeResult<bool> {
        self.object.query(|extension| extension.is_enabled())
    }

    pub fn set_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.object
            .post("extension.set_enabled", move |extension| extension.set_enabled(enabled))
    }

    /// Uninstall the extension from the profile
    pub fn remove(&self) -> BridgeResult<()> {
        self.object.post("extension.remove", |extension| extension.remove())
    }
}

impl std::fmt::Debug for BrowserExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserExtension")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
