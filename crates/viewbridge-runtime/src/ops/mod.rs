//! Operation tables
//!
//! Every exported [`Category`] has an ordered table of named operations. A caller
//! invokes an operation on a handle either by index (the stable position in the table)
//! or by name. Arguments and results are JSON values; entities an operation hands out
//! are exported into the caller's [`HandleTable`] and returned as handle ids.
//!
//! ```text
//! invoke(ctx, id, category, op, args)
//!   └─ HandleTable::object(id) ── category check ── OpTable[op] ── handler(target, ctx, args)
//! ```
//!
//! [`OpRegistry::standard`] builds the full set; each C ABI context owns one next to
//! its handle table.

mod args;
mod browser;
mod requests;
mod services;

pub use args::{
    arg_bool, arg_f64, arg_handle, arg_i64, arg_json, arg_opt_bool, arg_opt_json, arg_opt_str,
    arg_str, arg_u32, decode_base64, encode_base64,
};

use crate::error::{BridgeError, BridgeResult};
use crate::events::{BrowserEventHandler, IgnoreEvents};
use crate::handles::{Category, Exportable, ExportedObject, HandleId, HandleTable};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

pub type OpResult = BridgeResult<Value>;

type OpHandler = Arc<dyn Fn(&ExportedObject, &OpContext, &[Value]) -> OpResult + Send + Sync>;

/// State available to every operation
#[derive(Clone)]
pub struct OpContext {
    handles: Arc<HandleTable>,
    events: Arc<dyn BrowserEventHandler>,
}

impl OpContext {
    /// Context whose new browsers ignore their events
    pub fn new(handles: Arc<HandleTable>) -> Self {
        Self {
            handles,
            events: Arc::new(IgnoreEvents),
        }
    }

    /// Handler given to browsers created through `create_browser`
    pub fn with_event_handler(mut self, events: Arc<dyn BrowserEventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn event_handler(&self) -> Arc<dyn BrowserEventHandler> {
        self.events.clone()
    }

    /// Export `entity` for the caller and return its id as a JSON number
    pub fn export<T: Exportable>(&self, entity: Arc<T>) -> Value {
        Value::from(self.handles.export(entity))
    }

    /// Like [`export`](Self::export), with `null` for nothing
    pub fn export_opt<T: Exportable>(&self, entity: Option<Arc<T>>) -> Value {
        entity.map_or(Value::Null, |entity| self.export(entity))
    }

    /// Resolve a handle id found in the arguments
    pub fn resolve<T: Exportable>(&self, id: HandleId) -> BridgeResult<Arc<T>> {
        self.handles.get(id)
    }
}

impl std::fmt::Debug for OpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpContext")
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// One named operation
#[derive(Clone)]
pub struct OpDecl {
    name: &'static str,
    handler: OpHandler,
}

impl OpDecl {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for OpDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OpDecl").field(&self.name).finish()
    }
}

/// Declare an operation on entities of type `T`
pub fn op<T, F>(name: &'static str, handler: F) -> OpDecl
where
    T: Exportable,
    F: Fn(&Arc<T>, &OpContext, &[Value]) -> OpResult + Send + Sync + 'static,
{
    OpDecl {
        name,
        handler: Arc::new(move |object, ctx, args| {
            let target = T::from_object(object).ok_or_else(|| {
                BridgeError::invalid_state(format!(
                    "operation {} expects a {:?}, got a {:?}",
                    name,
                    T::CATEGORY,
                    object.category()
                ))
            })?;
            handler(&target, ctx, args)
        }),
    }
}

/// Ordered operations of one category
#[derive(Debug)]
pub struct OpTable {
    category: Category,
    ops: Vec<OpDecl>,
    by_name: HashMap<&'static str, usize>,
}

impl OpTable {
    pub fn new(category: Category, ops: Vec<OpDecl>) -> Self {
        let by_name = ops
            .iter()
            .enumerate()
            .map(|(index, op)| (op.name, index))
            .collect();
        Self {
            category,
            ops,
            by_name,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&OpDecl> {
        self.ops.get(index)
    }

    /// Index of the operation called `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.iter().map(|op| op.name)
    }
}

/// Category → operation table
#[derive(Debug)]
pub struct OpRegistry {
    tables: HashMap<Category, OpTable>,
}

impl OpRegistry {
    /// Registry with no tables
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Registry covering every category
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for table in browser::tables()
            .into_iter()
            .chain(requests::tables())
            .chain(services::tables())
        {
            registry.register(table);
        }
        registry
    }

    /// Add or replace the table for its category
    pub fn register(&mut self, table: OpTable) {
        self.tables.insert(table.category(), table);
    }

    pub fn table(&self, category: Category) -> Option<&OpTable> {
        self.tables.get(&category)
    }

    pub fn op_count(&self, category: Category) -> usize {
        self.table(category).map_or(0, OpTable::len)
    }

    /// Run operation `index` of `category` on handle `id`
    pub fn invoke(
        &self,
        ctx: &OpContext,
        id: HandleId,
        category: Category,
        index: usize,
        args: &[Value],
    ) -> OpResult {
        let op = self
            .table(category)
            .and_then(|table| table.get(index))
            .ok_or_else(|| BridgeError::UnknownOp {
                category,
                op: index.to_string(),
            })?;
        self.dispatch(ctx, id, category, op, args)
    }

    /// Run the operation called `name` of `category` on handle `id`
    pub fn invoke_named(
        &self,
        ctx: &OpContext,
        id: HandleId,
        category: Category,
        name: &str,
        args: &[Value],
    ) -> OpResult {
        let op = self
            .table(category)
            .and_then(|table| table.position(name).and_then(|index| table.get(index)))
            .ok_or_else(|| BridgeError::UnknownOp {
                category,
                op: name.to_string(),
            })?;
        self.dispatch(ctx, id, category, op, args)
    }

    fn dispatch(
        &self,
        ctx: &OpContext,
        id: HandleId,
        category: Category,
        op: &OpDecl,
        args: &[Value],
    ) -> OpResult {
        let object = ctx.handles.object(id)?;
        if object.category() != category {
            return Err(BridgeError::WrongCategory {
                id,
                expected: category,
                actual: object.category(),
            });
        }
        trace!(id, ?category, op = op.name, "Invoking operation");
        (op.handler)(&object, ctx, args)
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_category() {
        let registry = OpRegistry::standard();
        for category in Category::ALL {
            assert!(
                registry.op_count(category) > 0,
                "no operations for {:?}",
                category
            );
        }
    }

    #[test]
    fn test_op_names_are_unique_per_table() {
        let registry = OpRegistry::standard();
        for category in Category::ALL {
            let table = registry.table(category).unwrap();
            let names: Vec<_> = table.names().collect();
            for (index, name) in names.iter().enumerate() {
                assert_eq!(table.position(name), Some(index), "{:?}.{}", category, name);
            }
        }
    }

    #[test]
    fn test_stable_browser_indices() {
        let registry = OpRegistry::standard();
        let table = registry.table(Category::Browser).unwrap();
        assert_eq!(table.position("navigate"), Some(0));
        assert_eq!(table.get(0).map(OpDecl::name), Some("navigate"));
    }

    #[test]
    fn test_unknown_handle() {
        let registry = OpRegistry::standard();
        let ctx = OpContext::new(Arc::new(HandleTable::new()));
        assert!(matches!(
            registry.invoke(&ctx, 7, Category::Browser, 0, &[]),
            Err(BridgeError::InvalidHandle(7))
        ));
        assert!(matches!(
            registry.invoke_named(&ctx, 7, Category::Browser, "no_such_op", &[]),
            Err(BridgeError::UnknownOp { .. })
        ));
    }
}
