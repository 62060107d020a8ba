//! Deferred completion tokens
//!
//! When the engine asks the embedder something and waits for the answer (new window,
//! script dialog, permission, context menu, basic auth, download confirmation,
//! network interception), the bridge wraps the request in a token and hands it to the
//! caller. The caller may keep the token as long as it likes, call its mutators, and
//! then resolve it exactly once.
//!
//! Every token shares the same resolution rules ([`Resolution`]):
//!
//! - the owning browser is referenced weakly; once it is destroyed the token is
//!   detached and every operation fails with [`BridgeError::Detached`];
//! - resolution is claimed with a compare-exchange on the caller thread, so a second
//!   attempt fails with [`BridgeError::AlreadyResolved`] without reaching the engine;
//! - the engine capability itself is consumed on the owner thread.

mod auth;
mod context_menu;
mod dialog;
mod download;
mod intercept;
mod new_window;
mod permission;

pub use auth::BasicAuthRequest;
pub use context_menu::{ContextMenuRequest, MenuCollection, MenuItem};
pub use dialog::{ScriptDialogInfo, ScriptDialogRequest};
pub use download::{DownloadOperation, DownloadRequest};
pub use intercept::{
    HeaderEntry, InterceptedRequest, RequestIntercept, RequestOverrides, ResponseIntercept,
    ResponseOverrides, parse_header_lines,
};
pub use new_window::NewWindowRequest;
pub use permission::{PermissionInfo, PermissionRequest};

use crate::affinity::OwnerBound;
use crate::bridge::Bridge;
use crate::browser::Browser;
use crate::engine::Deferral;
use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Something a browser must invalidate when it is destroyed
pub(crate) trait Detach: Send + Sync {
    fn detach(&self);
}

/// Weak list of a browser's outstanding tokens
#[derive(Default)]
pub(crate) struct PendingRequests {
    tokens: Mutex<Vec<Weak<dyn Detach>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, token: Weak<dyn Detach>) {
        let mut tokens = self.tokens.lock();
        tokens.retain(|token| token.strong_count() > 0);
        tokens.push(token);
    }

    /// Detach every token that is still alive; returns how many were
    pub(crate) fn detach_all(&self) -> usize {
        let tokens = std::mem::take(&mut *self.tokens.lock());
        let mut detached = 0;
        for token in tokens.iter().filter_map(Weak::upgrade) {
            token.detach();
            detached += 1;
        }
        detached
    }

    pub(crate) fn live(&self) -> usize {
        self.tokens
            .lock()
            .iter()
            .filter(|token| token.strong_count() > 0)
            .count()
    }
}

/// Liveness and single-resolution state shared by all tokens
pub(crate) struct Resolution {
    browser: Weak<Browser>,
    resolved: AtomicBool,
    detached: AtomicBool,
}

impl Resolution {
    pub(crate) fn new(browser: &Arc<Browser>) -> Self {
        Self {
            browser: Arc::downgrade(browser),
            resolved: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire) || self.browser.strong_count() == 0
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// The owning browser, if it is still alive
    pub(crate) fn browser(&self) -> BridgeResult<Arc<Browser>> {
        if self.detached.load(Ordering::Acquire) {
            return Err(BridgeError::Detached);
        }
        let browser = self.browser.upgrade().ok_or(BridgeError::Detached)?;
        if browser.is_destroyed() {
            return Err(BridgeError::Detached);
        }
        Ok(browser)
    }

    /// Fail unless the request can still be changed
    pub(crate) fn ensure_pending(&self) -> BridgeResult<Arc<Browser>> {
        let browser = self.browser()?;
        if self.is_resolved() {
            return Err(BridgeError::AlreadyResolved);
        }
        Ok(browser)
    }

    /// Claim the one permitted resolution
    pub(crate) fn claim(&self, op: &'static str) -> BridgeResult<Arc<Browser>> {
        let browser = self.browser().inspect_err(|_| {
            warn!(op, "Ignoring resolution of a request whose browser is gone");
        })?;
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(op, "Ignoring duplicate resolution");
            return Err(BridgeError::AlreadyResolved);
        }
        Ok(browser)
    }
}

/// Engine event arguments plus the engine's single-use deferral
pub(crate) struct EngineRequest<A: ?Sized + 'static> {
    resolution: Resolution,
    bridge: Bridge,
    args: OwnerBound<Rc<A>>,
    deferral: OwnerBound<RefCell<Option<Box<dyn Deferral>>>>,
}

impl<A: ?Sized + 'static> EngineRequest<A> {
    /// Wrap an engine request; must run on the owner thread.
    ///
    /// The request is registered with the browser so it is detached on destruction.
    pub(crate) fn new(
        browser: &Arc<Browser>,
        args: Rc<A>,
        deferral: Box<dyn Deferral>,
    ) -> BridgeResult<Arc<Self>> {
        let bridge = browser.bridge().clone();
        let request = Arc::new(Self {
            resolution: Resolution::new(browser),
            args: OwnerBound::new(bridge.queue(), args)?,
            deferral: OwnerBound::new(bridge.queue(), RefCell::new(Some(deferral)))?,
            bridge,
        });
        let weak: Weak<dyn Detach> = Arc::downgrade(&request) as Weak<dyn Detach>;
        browser.pending_requests().register(weak);
        Ok(request)
    }

    pub(crate) fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Borrow the engine arguments; owner thread only
    pub(crate) fn args(&self) -> BridgeResult<&Rc<A>> {
        self.args.get()
    }

    /// Read from the engine arguments and wait for the answer
    pub(crate) fn query<R, F>(self: &Arc<Self>, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&A) -> R + Send + 'static,
    {
        self.resolution.browser()?;
        let this = self.clone();
        self.bridge.call_and_wait(move || this.args.with(|args| f(&**args)))?
    }

    /// Change the pending request without waiting
    pub(crate) fn mutate<F>(self: &Arc<Self>, op: &'static str, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&A) + Send + 'static,
    {
        self.resolution.ensure_pending()?;
        let this = self.clone();
        self.bridge.run_or_post(move || {
            // The browser may have been destroyed while this was queued
            if this.resolution.browser().is_err() {
                warn!(op, "Dropping mutation of a request whose browser is gone");
                return;
            }
            if let Err(e) = this.args.with(|args| f(&**args)) {
                warn!(op, error = %e, "Deferred request mutation failed");
            }
        });
        Ok(())
    }

    /// Resolve the request: apply `f`, then complete the engine deferral
    pub(crate) fn resolve<F>(self: &Arc<Self>, op: &'static str, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&A) + Send + 'static,
    {
        self.resolution.claim(op)?;
        let this = self.clone();
        self.bridge.run_or_post(move || {
            if this.resolution.browser().is_err() {
                warn!(op, "Dropping resolution of a request whose browser is gone");
                return;
            }
            let outcome = this
                .args
                .with(|args| f(&**args))
                .and_then(|_| this.deferral.with(|slot| slot.borrow_mut().take()));
            match outcome {
                Ok(Some(deferral)) => {
                    deferral.complete();
                    trace!(op, "Deferred request completed");
                }
                Ok(None) => warn!(op, "Deferral was already consumed"),
                Err(e) => warn!(op, error = %e, "Failed to complete deferred request"),
            }
        });
        Ok(())
    }
}

impl<A: ?Sized + 'static> Detach for EngineRequest<A> {
    fn detach(&self) {
        self.resolution.detach();
    }
}
