//! Browser context
//!
//! A [`Browser`] is one browsing surface created by an [`Environment`]. It is shared
//! across threads as `Arc<Browser>`; every call that touches the engine is marshaled
//! to the owner thread through the environment's [`Bridge`].
//!
//! ```text
//! Environment ──weak──┐
//!      ▲              │
//!      └──── weak ─ Browser ── owns ─▶ frames, event sink, engine surface
//!                     ▲
//!                     └──── weak ─ Frame, deferred tokens, cookie manager, DOM
//! ```
//!
//! Destruction ([`Browser::destroy`], or releasing the last exported handle) detaches
//! outstanding deferred tokens, drops the frames and closes the engine surface on the
//! owner thread. Afterwards every operation fails with [`BridgeError::BrowserGone`].

use crate::affinity::OwnerBound;
use crate::bridge::{Bridge, Reply};
use crate::browser_extension::BrowserExtension;
use crate::completion::Completer;
use crate::config::{BrowserOptions, BrowserSettings};
use crate::cookies::CookieManager;
use crate::deferred::PendingRequests;
use crate::dom::DomOperations;
use crate::engine::{FrameBackend, FrameId, HostResourceAccess, WebViewBackend};
use crate::environment::Environment;
use crate::error::{BridgeError, BridgeResult};
use crate::events::EventSink;
use crate::frame::Frame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace, warn};

static NEXT_BROWSER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`Browser`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BrowserState {
    /// Waiting for the engine to report the surface ready
    Constructing = 0,
    Live = 1,
    /// The engine surface was asked to close
    Closing = 2,
    Destroyed = 3,
}

impl BrowserState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Constructing,
            1 => Self::Live,
            2 => Self::Closing,
            _ => Self::Destroyed,
        }
    }
}

/// URI to retry with when the engine rejects `url` as malformed.
///
/// Bare host names such as `example.com` are retried over `http://`.
pub fn fallback_url(url: &str) -> Option<String> {
    if url.contains(' ') || !url.contains('.') || url.contains("://") {
        return None;
    }
    Some(format!("http://{}", url))
}

/// One browsing surface
pub struct Browser {
    id: u64,
    environment: Weak<Environment>,
    bridge: Bridge,
    options: BrowserOptions,
    state: AtomicU8,
    surface: Mutex<Option<BrowserObject<dyn WebViewBackend>>>,
    /// Ordered by creation
    frames: Mutex<Vec<Arc<Frame>>>,
    events: EventSink,
    pending: PendingRequests,
    dom: OnceLock<Arc<DomOperations>>,
    interception: AtomicBool,
}

impl Browser {
    pub(crate) fn new(
        environment: &Arc<Environment>,
        options: BrowserOptions,
        events: EventSink,
    ) -> Arc<Self> {
        let browser = Arc::new(Self {
            id: NEXT_BROWSER_ID.fetch_add(1, Ordering::Relaxed),
            environment: Arc::downgrade(environment),
            bridge: environment.bridge().clone(),
            options,
            state: AtomicU8::new(BrowserState::Constructing as u8),
            surface: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
            events,
            pending: PendingRequests::default(),
            dom: OnceLock::new(),
            interception: AtomicBool::new(false),
        });
        trace!(browser = browser.id, "Browser constructing");
        browser
    }

    /// Process-unique serial, used in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> BrowserState {
        BrowserState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.state() == BrowserState::Live
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == BrowserState::Destroyed
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }

    pub fn environment(&self) -> BridgeResult<Arc<Environment>> {
        self.environment
            .upgrade()
            .ok_or(BridgeError::EnvironmentGone)
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    pub(crate) fn pending_requests(&self) -> &PendingRequests {
        &self.pending
    }

    /// Number of deferred tokens that are still referenced somewhere
    pub fn pending_request_count(&self) -> usize {
        self.pending.live()
    }

    /// Attach the engine surface once it is ready; owner thread only
    pub(crate) fn attach_surface(
        self: &Arc<Self>,
        webview: Rc<dyn WebViewBackend>,
    ) -> BridgeResult<()> {
        if self
            .state
            .compare_exchange(
                BrowserState::Constructing as u8,
                BrowserState::Live as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Destroyed before the engine finished creating it
            webview.close();
            return Err(BridgeError::BrowserGone);
        }

        *self.surface.lock() = Some(BrowserObject::new(self, webview)?);
        debug!(browser = self.id, "Browser live");
        Ok(())
    }

    fn surface(&self) -> BridgeResult<BrowserObject<dyn WebViewBackend>> {
        match self.state() {
            BrowserState::Destroyed => return Err(BridgeError::BrowserGone),
            BrowserState::Constructing => {
                return Err(BridgeError::invalid_state("browser surface is not ready"));
            }
            BrowserState::Live | BrowserState::Closing => {}
        }
        self.surface.lock().clone().ok_or(BridgeError::BrowserGone)
    }

    /// The engine surface itself; owner thread only
    pub(crate) fn webview_on_owner(&self) -> BridgeResult<Rc<dyn WebViewBackend>> {
        let surface = self.surface()?;
        let webview = surface.get()?.clone();
        Ok(webview)
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Start navigating to `url`; does not wait for the navigation.
    ///
    /// If the engine rejects the URI and it looks like a bare host name, the
    /// navigation is retried with `http://` prefixed.
    pub fn navigate(&self, url: impl Into<String>) -> BridgeResult<()> {
        let url = url.into();
        let browser = self.id;
        self.surface()?.post("browser.navigate", move |webview| {
            match webview.navigate(&url) {
                Ok(()) => trace!(browser, url = %url, "Navigation started"),
                Err(BridgeError::InvalidArgument(reason)) => match fallback_url(&url) {
                    Some(fallback) => {
                        debug!(browser, url = %url, fallback = %fallback, "Retrying navigation over http");
                        if let Err(e) = webview.navigate(&fallback) {
                            warn!(browser, url = %fallback, error = %e, "Navigation failed");
                        }
                    }
                    None => warn!(browser, url = %url, reason = %reason, "Navigation rejected"),
                },
                Err(e) => warn!(browser, url = %url, error = %e, "Navigation failed"),
            }
        })
    }

    pub fn can_go_back(&self) -> BridgeResult<bool> {
        self.surface()?.query(|webview| webview.can_go_back())
    }

    pub fn can_go_forward(&self) -> BridgeResult<bool> {
        self.surface()?.query(|webview| webview.can_go_forward())
    }

    pub fn go_back(&self) -> BridgeResult<()> {
        self.surface()?.post("browser.go_back", |webview| webview.go_back())
    }

    pub fn go_forward(&self) -> BridgeResult<()> {
        self.surface()?
            .post("browser.go_forward", |webview| webview.go_forward())
    }

    pub fn reload(&self) -> BridgeResult<()> {
        self.surface()?.post("browser.reload", |webview| webview.reload())
    }

    pub fn stop(&self) -> BridgeResult<()> {
        self.surface()?.post("browser.stop", |webview| webview.stop())
    }

    pub fn source_url(&self) -> BridgeResult<String> {
        self.surface()?.query(|webview| webview.source_url())
    }

    pub fn title(&self) -> BridgeResult<String> {
        self.surface()?.query(|webview| webview.title())
    }

    // ------------------------------------------------------------------
    // Settings and state
    // ------------------------------------------------------------------

    pub fn settings(&self) -> BridgeResult<BrowserSettings> {
        self.surface()?.query(|webview| webview.settings())
    }

    pub fn set_settings(&self, settings: BrowserSettings) -> BridgeResult<()> {
        self.surface()?
            .post("browser.set_settings", move |webview| webview.set_settings(&settings))
    }

    pub fn zoom_factor(&self) -> BridgeResult<f64> {
        self.surface()?.query(|webview| webview.zoom_factor())
    }

    pub fn set_zoom_factor(&self, factor: f64) -> BridgeResult<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(BridgeError::invalid_argument(format!(
                "zoom factor must be positive, got {}",
                factor
            )));
        }
        self.surface()?
            .post("browser.set_zoom_factor", move |webview| webview.set_zoom_factor(factor))
    }

    pub fn is_muted(&self) -> BridgeResult<bool> {
        self.surface()?.query(|webview| webview.is_muted())
    }

    pub fn set_muted(&self, muted: bool) -> BridgeResult<()> {
        self.surface()?
            .post("browser.set_muted", move |webview| webview.set_muted(muted))
    }

    pub fn suspend(&self) -> BridgeResult<()> {
        self.surface()?.post("browser.suspend", |webview| webview.suspend())
    }

    pub fn resume(&self) -> BridgeResult<()> {
        self.surface()?.post("browser.resume", |webview| webview.resume())
    }

    pub fn is_suspended(&self) -> BridgeResult<bool> {
        self.surface()?.query(|webview| webview.is_suspended())
    }

    pub fn user_agent(&self) -> BridgeResult<String> {
        self.surface()?.query(|webview| webview.user_agent())
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) -> BridgeResult<()> {
        let user_agent = user_agent.into();
        self.surface()?.post("browser.set_user_agent", move |webview| {
            webview.set_user_agent(&user_agent)
        })
    }

    pub fn profile_name(&self) -> BridgeResult<String> {
        self.surface()?.query(|webview| webview.profile_name())
    }

    /// Background color as `0xAARRGGBB`
    pub fn set_background_color(&self, argb: u32) -> BridgeResult<()> {
        self.surface()?.post("browser.set_background_color", move |webview| {
            webview.set_background_color(argb)
        })
    }

    // ------------------------------------------------------------------
    // Scripts and messages
    // ------------------------------------------------------------------

    /// Evaluate `script` in the main frame and wait for its JSON result
    pub fn execute_script(&self, script: impl Into<String>) -> BridgeResult<String> {
        let script = script.into();
        self.surface()?.deferred(move |webview, completer| {
            webview.execute_script(&script, complete_with(completer))
        })
    }

    /// Evaluate `script` without waiting; `callback` runs on the owner thread
    pub fn execute_script_async<F>(&self, script: impl Into<String>, callback: F) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<String>) + Send + 'static,
    {
        let script = script.into();
        self.surface()?.deferred_async(
            move |webview, reply| webview.execute_script(&script, reply_with(reply)),
            callback,
        )
    }

    /// Call a protocol method and wait for its JSON result
    pub fn call_protocol_method(&self, method: &str, params: &str) -> BridgeResult<String> {
        let method = method.to_string();
        let params = params.to_string();
        self.surface()?.deferred(move |webview, completer| {
            webview.call_protocol_method(&method, &params, complete_with(completer))
        })
    }

    /// Call a protocol method without waiting; `callback` runs on the owner thread
    pub fn call_protocol_method_async<F>(
        &self,
        method: &str,
        params: &str,
        callback: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<String>) + Send + 'static,
    {
        let method = method.to_string();
        let params = params.to_string();
        self.surface()?.deferred_async(
            move |webview, reply| webview.call_protocol_method(&method, &params, reply_with(reply)),
            callback,
        )
    }

    /// Fire a protocol command whose reply nobody waits for; failures are logged
    pub fn send_protocol_command(&self, method: &str, params: Value) {
        let name = method.to_string();
        let params = params.to_string();
        let sent = self.surface().and_then(|surface| {
            surface.post("browser.protocol_command", move |webview| {
                let logged = name.clone();
                webview.call_protocol_method(
                    &name,
                    &params,
                    Box::new(move |result| {
                        if let Err(e) = result {
                            warn!(method = %logged, error = %e, "Protocol command failed");
                        }
                    }),
                );
            })
        });
        if let Err(e) = sent {
            warn!(browser = self.id, method, error = %e, "Dropping protocol command");
        }
    }

    /// Register a script run on every new document; returns its id
    pub fn add_init_script(&self, script: impl Into<String>) -> BridgeResult<String> {
        let script = script.into();
        self.surface()?.deferred(move |webview, completer| {
            webview.add_init_script(&script, complete_with(completer))
        })
    }

    pub fn remove_init_script(&self, id: impl Into<String>) -> BridgeResult<()> {
        let id = id.into();
        self.surface()?.post("browser.remove_init_script", move |webview| {
            webview.remove_init_script(&id)
        })
    }

    /// Post a message to the page; `as_json` delivers it as a parsed object
    pub fn post_web_message(&self, message: impl Into<String>, as_json: bool) -> BridgeResult<()> {
        let message = message.into();
        self.surface()?.post("browser.post_web_message", move |webview| {
            webview.post_web_message(&message, as_json)
        })
    }

    pub fn set_virtual_host_mapping(
        &self,
        host: impl Into<String>,
        folder: impl Into<String>,
        access: HostResourceAccess,
    ) -> BridgeResult<()> {
        let host = host.into();
        let folder = folder.into();
        self.surface()?.post("browser.set_virtual_host_mapping", move |webview| {
            webview.set_virtual_host_mapping(&host, &folder, access)
        })
    }

    pub fn clear_virtual_host_mapping(&self, host: impl Into<String>) -> BridgeResult<()> {
        let host = host.into();
        self.surface()?.post("browser.clear_virtual_host_mapping", move |webview| {
            webview.clear_virtual_host_mapping(&host)
        })
    }

    /// Route every request through [`RequestIntercept`](crate::deferred::RequestIntercept)
    /// events, or stop doing so
    pub fn set_request_interception(&self, enabled: bool) -> BridgeResult<()> {
        self.surface()?;
        if enabled {
            self.send_protocol_command(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] }),
            );
        } else {
            self.send_protocol_command("Fetch.disable", json!({}));
        }
        self.interception.store(enabled, Ordering::Release);
        debug!(browser = self.id, enabled, "Request interception toggled");
        Ok(())
    }

    pub fn is_request_interception_enabled(&self) -> bool {
        self.interception.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frame_at(&self, index: usize) -> Option<Arc<Frame>> {
        self.frames.lock().get(index).cloned()
    }

    /// Current frames, in creation order
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames.lock().clone()
    }

    /// Frame with the engine-assigned `id`
    pub fn frame(&self, id: FrameId) -> Option<Arc<Frame>> {
        self.frames
            .lock()
            .iter()
            .find(|frame| frame.id() == id)
            .cloned()
    }

    pub(crate) fn add_frame(self: &Arc<Self>, backend: Rc<dyn FrameBackend>) -> BridgeResult<Arc<Frame>> {
        let frame = Frame::new(self, backend)?;
        self.frames.lock().push(frame.clone());
        debug!(browser = self.id, frame = frame.id(), "Frame created");
        Ok(frame)
    }

    /// Remove the frame with `id`, wherever it sits in the collection
    pub(crate) fn remove_frame(&self, id: FrameId) -> Option<Arc<Frame>> {
        let removed = {
            let mut frames = self.frames.lock();
            let index = frames.iter().position(|frame| frame.id() == id)?;
            frames.remove(index)
        };
        removed.mark_destroyed();
        debug!(browser = self.id, frame = id, "Frame destroyed");
        Some(removed)
    }

    pub fn cookie_manager(self: &Arc<Self>) -> BridgeResult<Arc<CookieManager>> {
        let surface = self.surface()?;
        let browser = self.clone();
        surface.query_with(move |webview| CookieManager::wrap(&browser, webview.cookie_store()))
    }

    /// DOM helper bound to this browser
    pub fn dom(self: &Arc<Self>) -> BridgeResult<Arc<DomOperations>> {
        if self.is_destroyed() {
            return Err(BridgeError::BrowserGone);
        }
        Ok(self
            .dom
            .get_or_init(|| Arc::new(DomOperations::new(self)))
            .clone())
    }

    /// Load an unpacked extension from `path` and wait for the engine
    pub fn load_extension(self: &Arc<Self>, path: impl Into<String>) -> BridgeResult<Arc<BrowserExtension>> {
        let path = path.into();
        let browser = self.clone();
        self.surface()?.deferred(move |webview, completer| {
            webview.load_extension(
                &path,
                Box::new(move |result| {
                    completer.complete(result.and_then(|extension| {
                        BrowserExtension::wrap(&browser, extension)
                    }))
                }),
            )
        })
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Ask the engine to close the surface.
    ///
    /// The browser stays usable for queries until it is destroyed.
    pub fn close(&self) -> BridgeResult<()> {
        let surface = self.surface()?;
        if self
            .state
            .compare_exchange(
                BrowserState::Live as u8,
                BrowserState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!(browser = self.id, "Browser closing");
        }
        surface.post("browser.close", |webview| webview.close())
    }

    /// Tear the browser down; idempotent.
    ///
    /// Pending deferred tokens are detached, frames are dropped, and the engine
    /// surface is closed and released on the owner thread.
    pub fn destroy(&self) {
        let previous = self.state.swap(BrowserState::Destroyed as u8, Ordering::AcqRel);
        if BrowserState::from_raw(previous) == BrowserState::Destroyed {
            return;
        }

        let detached = self.pending.detach_all();
        let frames = std::mem::take(&mut *self.frames.lock());
        for frame in &frames {
            frame.mark_destroyed();
        }

        let surface = self.surface.lock().take();
        if let Some(surface) = surface {
            let webview = surface.into_inner();
            let closing = previous == BrowserState::Closing as u8;
            self.bridge.run_or_post(move || {
                if !closing {
                    if let Ok(webview) = webview.get() {
                        webview.close();
                    }
                }
                drop(webview);
            });
        }

        debug!(
            browser = self.id,
            detached,
            frames = frames.len(),
            "Browser destroyed"
        );
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("frames", &self.frame_count())
            .finish()
    }
}

fn complete_with(completer: Completer<BridgeResult<String>>) -> crate::engine::ScriptCallback {
    Box::new(move |result| completer.complete(result))
}

fn reply_with(reply: Reply<BridgeResult<String>>) -> crate::engine::ScriptCallback {
    Box::new(move |result| reply.send(result))
}

/// An engine object that belongs to a browser.
///
/// Holds the browser weakly; every access checks it is still alive, then runs on the
/// owner thread.
pub(crate) struct BrowserObject<T: ?Sized + 'static> {
    browser: Weak<Browser>,
    bridge: Bridge,
    object: Arc<OwnerBound<Rc<T>>>,
}

impl<T: ?Sized + 'static> Clone for BrowserObject<T> {
    fn clone(&self) -> Self {
        Self {
            browser: self.browser.clone(),
            bridge: self.bridge.clone(),
            object: self.object.clone(),
        }
    }
}

impl<T: ?Sized + 'static> BrowserObject<T> {
    /// Wrap an engine object; owner thread only
    pub(crate) fn new(browser: &Arc<Browser>, value: Rc<T>) -> BridgeResult<Self> {
        let bridge = browser.bridge().clone();
        let object = Arc::new(OwnerBound::new(bridge.queue(), value)?);
        Ok(Self {
            browser: Arc::downgrade(browser),
            bridge,
            object,
        })
    }

    pub(crate) fn browser(&self) -> BridgeResult<Arc<Browser>> {
        let browser = self.browser.upgrade().ok_or(BridgeError::BrowserGone)?;
        if browser.is_destroyed() {
            return Err(BridgeError::BrowserGone);
        }
        Ok(browser)
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Borrow the engine object; owner thread only
    pub(crate) fn get(&self) -> BridgeResult<&Rc<T>> {
        self.object.get()
    }

    pub(crate) fn into_inner(self) -> Arc<OwnerBound<Rc<T>>> {
        self.object
    }

    /// Read from the object and wait for the answer
    pub(crate) fn query<R, F>(&self, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        self.browser()?;
        let object = self.object.clone();
        self.bridge
            .call_and_wait(move || object.with(|value| f(&**value)))?
    }

    /// Like [`query`](Self::query), for operations that can fail themselves
    pub(crate) fn query_with<R, F>(&self, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> BridgeResult<R> + Send + 'static,
    {
        self.browser()?;
        let object = self.object.clone();
        self.bridge
            .call_and_wait(move || object.with(|value| f(&**value)).and_then(|result| result))?
    }

    /// Change the object without waiting
    pub(crate) fn post<F>(&self, op: &'static str, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.browser()?;
        let browser = self.browser.clone();
        let object = self.object.clone();
        self.bridge.run_or_post(move || {
            if browser.upgrade().is_none_or(|browser| browser.is_destroyed()) {
                warn!(op, "Dropping engine call queued before the browser was destroyed");
                return;
            }
            if let Err(e) = object.with(|value| f(&**value)) {
                warn!(op, error = %e, "Engine call failed");
            }
        });
        Ok(())
    }

    /// Start an operation that completes through an engine callback, and wait for it
    pub(crate) fn deferred<R, F>(&self, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&T, Completer<BridgeResult<R>>) + Send + 'static,
    {
        self.browser()?;
        let object = self.object.clone();
        self.bridge
            .call_deferred(move |completer| match object.get() {
                Ok(value) => f(&**value, completer),
                Err(e) => completer.complete(Err(e)),
            })?
    }

    /// Non-blocking counterpart of [`deferred`](Self::deferred)
    pub(crate) fn deferred_async<R, F, C>(&self, f: F, continuation: C) -> BridgeResult<()>
    where
        R: Send + 'static,
        F: FnOnce(&T, Reply<BridgeResult<R>>) + Send + 'static,
        C: FnOnce(BridgeResult<R>) + Send + 'static,
    {
        self.browser()?;
        let object = self.object.clone();
        self.bridge.call_deferred_async(
            move |reply| match object.get() {
                Ok(value) => f(&**value, reply),
                Err(e) => reply.send(Err(e)),
            },
            continuation,
        );
        Ok(())
    }
}
