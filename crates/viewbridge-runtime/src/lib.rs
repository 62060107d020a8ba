//! viewbridge-runtime - drive an embedded browser engine from any thread.
//!
//! Browser engines are apartment-bound: every call into them, and every callback out
//! of them, happens on one thread. This crate puts that thread behind a task queue
//! and lets any other thread make calls, wait for results, and receive events, while
//! entities handed to foreign callers are tracked by reference-counted handles.
//!
//! # Features
//!
//! - **Owner-thread bridge**: post, run-or-post, blocking and async calls with a
//!   configurable timeout, re-entrant when issued from the owner thread itself
//! - **Typed entities**: environments, browsers, frames, cookie managers, DOM helpers
//!   and extensions, all `Send + Sync`
//! - **Deferred requests**: new windows, dialogs, permissions, context menus, auth,
//!   downloads and network interception, resolved exactly once from any thread
//! - **Handle export**: opaque ids with external reference counts and per-category
//!   operation tables, exposed through a C ABI
//! - **Headless engine**: an in-memory backend for dry runs and tests
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use viewbridge_runtime::prelude::*;
//!
//! let environment = Environment::builder().headless().spawn().unwrap();
//! let (events, received) = ChannelHandler::new();
//! let browser = environment
//!     .create_browser(BrowserOptions::default(), Arc::new(events))
//!     .unwrap();
//!
//! browser.navigate("https://example.com/").unwrap();
//! assert_eq!(browser.source_url().unwrap(), "https://example.com/");
//! assert!(received.recv().is_ok());
//!
//! environment.shutdown().unwrap();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Caller threads (Rust API or C ABI)                          │
//! │   Environment · Browser · Frame · requests · handles         │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ Bridge::post / call_and_wait
//!                                ↓
//! ┌──────────────────────────────────────────────────────────────┐
//! │  TaskQueue (FIFO, bound to the owner thread)                 │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ↓
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Owner thread                                                │
//! │   EngineBackend · WebViewBackend · OwnerBound<T> state       │
//! │   engine callbacks → BrowserEvent → BrowserEventHandler      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod affinity;
pub mod bridge;
pub mod browser;
pub mod browser_extension;
pub mod completion;
pub mod config;
pub mod cookies;
pub mod deferred;
pub mod dom;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod frame;
pub mod handles;
pub mod headless;
pub mod ops;
pub mod queue;

pub use affinity::OwnerBound;
pub use bridge::{Bridge, Reply};
pub use browser::{Browser, BrowserState, fallback_url};
pub use browser_extension::BrowserExtension;
pub use completion::{Completer, CompletionFlag, FlagState};
pub use config::{Bounds, BrowserOptions, BrowserSettings, EnvironmentOptions};
pub use cookies::CookieManager;
pub use dom::DomOperations;
pub use environment::{Environment, EnvironmentBuilder, EnvironmentState};
pub use error::{BridgeError, BridgeResult};
pub use events::{BrowserEvent, BrowserEventHandler, ChannelHandler, EventKind, IgnoreEvents};
pub use frame::{Frame, FrameState};
pub use handles::{Category, HandleId, HandleTable};
pub use ops::{OpContext, OpRegistry};
pub use queue::{OwnerThread, TaskQueue};

pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::browser::{Browser, BrowserState};
    pub use crate::config::{BrowserOptions, BrowserSettings, EnvironmentOptions};
    pub use crate::deferred::{
        BasicAuthRequest, ContextMenuRequest, DownloadRequest, NewWindowRequest,
        PermissionRequest, RequestIntercept, ResponseIntercept, ScriptDialogRequest,
    };
    pub use crate::environment::{Environment, EnvironmentBuilder};
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::events::{
        BrowserEvent, BrowserEventHandler, ChannelHandler, EventKind, IgnoreEvents,
    };
    pub use crate::frame::Frame;
    pub use crate::handles::{Category, HandleTable};
    pub use crate::headless::HeadlessProbe;
}
