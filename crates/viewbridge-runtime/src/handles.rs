//! # Exported handles
//!
//! The [`HandleTable`] is where bridge entities are kept while a foreign caller holds
//! them. A caller never sees a pointer; it sees a [`HandleId`] plus the [`Category`]
//! that selects the operation table for it.
//!
//! | Operation | Effect on the external count |
//! |-----------|------------------------------|
//! | [`export`](HandleTable::export) | +1 (same entity, same id) |
//! | [`add_ref`](HandleTable::add_ref) | +1 |
//! | [`release`](HandleTable::release) | -1; at zero the entry is removed and the entity's destruction path runs once |
//! | [`get`](HandleTable::get) | none; the returned `Arc` keeps the entity alive for one operation |
//!
//! Counts are atomics and may be changed from any thread.
//!
//! ## Example
//!
//! ```ignore
//! let id = table.export(browser.clone());
//! let again = table.export(browser.clone());
//! assert_eq!(id, again);
//!
//! table.release(id, Category::Browser)?;
//! table.release(id, Category::Browser)?; // destroys the browser
//! ```

use crate::browser::Browser;
use crate::browser_extension::BrowserExtension;
use crate::cookies::CookieManager;
use crate::deferred::{
    BasicAuthRequest, ContextMenuRequest, DownloadOperation, DownloadRequest, MenuCollection,
    MenuItem, NewWindowRequest, PermissionRequest, RequestIntercept, ResponseIntercept,
    ScriptDialogRequest,
};
use crate::dom::DomOperations;
use crate::environment::Environment;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::Frame;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace};

/// Opaque identity handed to foreign callers.
///
/// Ids start at 1 and are never reused within a table; 0 means "no handle".
pub type HandleId = u32;

/// Entity category; selects the operation table for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Category {
    Environment = 0,
    Browser = 1,
    Frame = 2,
    NewWindow = 3,
    ScriptDialog = 4,
    Permission = 5,
    ContextMenuParams = 6,
    ContextMenuCollection = 7,
    ContextMenuItem = 8,
    CookieManager = 9,
    RequestIntercept = 10,
    ResponseIntercept = 11,
    BasicAuth = 12,
    DownloadOperation = 13,
    DownloadConfirm = 14,
    Dom = 15,
    Extension = 16,
}

impl Category {
    pub const ALL: [Category; 17] = [
        Category::Environment,
        Category::Browser,
        Category::Frame,
        Category::NewWindow,
        Category::ScriptDialog,
        Category::Permission,
        Category::ContextMenuParams,
        Category::ContextMenuCollection,
        Category::ContextMenuItem,
        Category::CookieManager,
        Category::RequestIntercept,
        Category::ResponseIntercept,
        Category::BasicAuth,
        Category::DownloadOperation,
        Category::DownloadConfirm,
        Category::Dom,
        Category::Extension,
    ];

    /// Category for a raw tag received over the C boundary
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// A strong reference to any exportable entity
#[derive(Clone)]
pub enum ExportedObject {
    Environment(Arc<Environment>),
    Browser(Arc<Browser>),
    Frame(Arc<Frame>),
    NewWindow(Arc<NewWindowRequest>),
    ScriptDialog(Arc<ScriptDialogRequest>),
    Permission(Arc<PermissionRequest>),
    ContextMenuParams(Arc<ContextMenuRequest>),
    ContextMenuCollection(Arc<MenuCollection>),
    ContextMenuItem(Arc<MenuItem>),
    CookieManager(Arc<CookieManager>),
    RequestIntercept(Arc<RequestIntercept>),
    ResponseIntercept(Arc<ResponseIntercept>),
    BasicAuth(Arc<BasicAuthRequest>),
    DownloadOperation(Arc<DownloadOperation>),
    DownloadConfirm(Arc<DownloadRequest>),
    Dom(Arc<DomOperations>),
    Extension(Arc<BrowserExtension>),
}

/// Entity types that can be placed in a [`HandleTable`]
pub trait Exportable: Send + Sync + Sized + 'static {
    const CATEGORY: Category;

    fn into_object(this: Arc<Self>) -> ExportedObject;
    fn from_object(object: &ExportedObject) -> Option<Arc<Self>>;
}

macro_rules! exportable {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl Exportable for $ty {
                const CATEGORY: Category = Category::$variant;

                fn into_object(this: Arc<Self>) -> ExportedObject {
                    ExportedObject::$variant(this)
                }

                fn from_object(object: &ExportedObject) -> Option<Arc<Self>> {
                    match object {
                        ExportedObject::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )*

        impl ExportedObject {
            pub fn category(&self) -> Category {
                match self {
                    $(ExportedObject::$variant(_) => Category::$variant,)*
                }
            }

            /// Address of the entity, used to find an existing export
            fn identity(&self) -> usize {
                match self {
                    $(ExportedObject::$variant(inner) => Arc::as_ptr(inner) as *const () as usize,)*
                }
            }
        }
    };
}

exportable! {
    Environment => Environment,
    Browser => Browser,
    Frame => Frame,
    NewWindow => NewWindowRequest,
    ScriptDialog => ScriptDialogRequest,
    Permission => PermissionRequest,
    ContextMenuParams => ContextMenuRequest,
    ContextMenuCollection => MenuCollection,
    ContextMenuItem => MenuItem,
    CookieManager => CookieManager,
    RequestIntercept => RequestIntercept,
    ResponseIntercept => ResponseIntercept,
    BasicAuth => BasicAuthRequest,
    DownloadOperation => DownloadOperation,
    DownloadConfirm => DownloadRequest,
    Dom => DomOperations,
    Extension => BrowserExtension,
}

impl ExportedObject {
    /// Destruction path run when the last external reference is released
    fn destroy(&self) {
        match self {
            ExportedObject::Environment(environment) => {
                if let Err(e) = environment.shutdown() {
                    debug!(error = %e, "Environment shutdown after last release failed");
                }
            }
            ExportedObject::Browser(browser) => browser.destroy(),
            _ => {}
        }
    }
}

impl std::fmt::Debug for ExportedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExportedObject")
            .field(&self.category())
            .finish()
    }
}

struct Entry {
    object: ExportedObject,
    refs: AtomicU32,
}

/// Thread-safe table of exported entities with external reference counts
pub struct HandleTable {
    entries: DashMap<HandleId, Arc<Entry>>,
    /// Entity address -> id, so re-exports reuse the id
    by_identity: DashMap<usize, HandleId>,
    /// Counter for generating unique ids. Starts at 1 (0 is reserved for "null").
    next_id: AtomicU32,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_identity: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Export `entity` for a caller, taking one external reference on its behalf
    pub fn export<T: Exportable>(&self, entity: Arc<T>) -> HandleId {
        self.export_object(T::into_object(entity))
    }

    /// Export an already type-erased entity
    pub fn export_object(&self, object: ExportedObject) -> HandleId {
        let identity = object.identity();

        match self.by_identity.entry(identity) {
            MapEntry::Occupied(mut slot) => {
                let id = *slot.get();
                if let Some(entry) = self.entries.get(&id) {
                    entry.refs.fetch_add(1, Ordering::AcqRel);
                    trace!(id, "Re-exported handle");
                    return id;
                }
                // The previous export was released concurrently; start a new one
                let id = self.insert(object);
                slot.insert(id);
                id
            }
            MapEntry::Vacant(slot) => {
                let id = self.insert(object);
                slot.insert(id);
                id
            }
        }
    }

    fn insert(&self, object: ExportedObject) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, category = ?object.category(), "Exported handle");
        self.entries.insert(
            id,
            Arc::new(Entry {
                object,
                refs: AtomicU32::new(1),
            }),
        );
        id
    }

    /// Take one more external reference
    pub fn add_ref(&self, id: HandleId, category: Category) -> BridgeResult<u32> {
        let entry = self.entries.get(&id).ok_or(BridgeError::InvalidHandle(id))?;
        check_category(id, category, entry.object.category())?;
        Ok(entry.refs.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Drop one external reference and return how many remain.
    ///
    /// The release that reaches zero removes the entry and runs the entity's
    /// destruction path, exactly once.
    pub fn release(&self, id: HandleId, category: Category) -> BridgeResult<u32> {
        {
            let entry = self.entries.get(&id).ok_or(BridgeError::InvalidHandle(id))?;
            check_category(id, category, entry.object.category())?;
        }

        let mut remaining = None;
        let removed = self.entries.remove_if(&id, |_, entry| {
            let left = entry.refs.fetch_sub(1, Ordering::AcqRel) - 1;
            remaining = Some(left);
            left == 0
        });

        match (removed, remaining) {
            (Some((_, entry)), _) => {
                let identity = entry.object.identity();
                self.by_identity.remove_if(&identity, |_, mapped| *mapped == id);
                debug!(id, category = ?category, "Last external reference released");
                entry.object.destroy();
                Ok(0)
            }
            (None, Some(left)) => Ok(left),
            // Removed by a concurrent release between the check and the decrement
            (None, None) => Err(BridgeError::InvalidHandle(id)),
        }
    }

    /// Resolve a handle to its entity
    pub fn get<T: Exportable>(&self, id: HandleId) -> BridgeResult<Arc<T>> {
        let entry = self.entries.get(&id).ok_or(BridgeError::InvalidHandle(id))?;
        T::from_object(&entry.object).ok_or(BridgeError::WrongCategory {
            id,
            expected: T::CATEGORY,
            actual: entry.object.category(),
        })
    }

    /// Resolve a handle without knowing its type
    pub fn object(&self, id: HandleId) -> BridgeResult<ExportedObject> {
        self.entries
            .get(&id)
            .map(|entry| entry.object.clone())
            .ok_or(BridgeError::InvalidHandle(id))
    }

    pub fn category(&self, id: HandleId) -> Option<Category> {
        self.entries.get(&id).map(|entry| entry.object.category())
    }

    /// Current external count, `0` if the handle does not exist
    pub fn ref_count(&self, id: HandleId) -> u32 {
        self.entries
            .get(&id)
            .map(|entry| entry.refs.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Id under which `entity` is currently exported
    pub fn find<T: Exportable>(&self, entity: &Arc<T>) -> Option<HandleId> {
        let identity = Arc::as_ptr(entity) as *const () as usize;
        self.by_identity.get(&identity).map(|id| *id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry regardless of its count and return the entities.
    ///
    /// Destruction paths are not run; dropping the returned objects releases them.
    pub fn drain(&self) -> Vec<ExportedObject> {
        let ids: Vec<HandleId> = self.entries.iter().map(|entry| *entry.key()).collect();
        self.by_identity.clear();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .map(|(_, entry)| entry.object.clone())
            .collect()
    }
}

fn check_category(id: HandleId, expected: Category, actual: Category) -> BridgeResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BridgeError::WrongCategory {
            id,
            expected,
            actual,
        })
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("entries", &self.entries.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_raw_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_raw(category.as_raw()), Some(category));
        }
        assert_eq!(Category::from_raw(17), None);
    }

    #[test]
    fn test_empty_table() {
        let table = HandleTable::new();
        assert!(table.is_empty());
        assert_eq!(table.ref_count(1), 0);
        assert!(matches!(
            table.release(1, Category::Browser),
            Err(BridgeError::InvalidHandle(1))
        ));
        assert!(matches!(
            table.add_ref(0, Category::Browser),
            Err(BridgeError::InvalidHandle(0))
        ));
    }
}
