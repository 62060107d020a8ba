//! Engine environment
//!
//! An [`Environment`] is the root of one engine instance: it owns the owner-thread
//! queue (through its [`Bridge`]), the engine backend, and the options it was created
//! with. Browsers are created from it and refer back to it weakly.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use viewbridge_runtime::prelude::*;
//!
//! let environment = Environment::builder()
//!     .headless()
//!     .thread_name("docs-owner")
//!     .spawn()
//!     .unwrap();
//!
//! let browser = environment
//!     .create_browser(BrowserOptions::default(), Arc::new(IgnoreEvents))
//!     .unwrap();
//! browser.navigate("https://example.com").unwrap();
//!
//! environment.shutdown().unwrap();
//! ```

use crate::affinity::OwnerBound;
use crate::bridge::Bridge;
use crate::browser::Browser;
use crate::completion::Completer;
use crate::config::{BrowserOptions, EnvironmentOptions};
use crate::engine::{EngineBackend, EngineEvents, ProcessInfo};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{
    BrowserEvent, BrowserEventHandler, BrowserEvents, CONSOLE_MESSAGE_EVENT, EventSink,
    FILE_CHOOSER_EVENT, REQUEST_PAUSED_EVENT,
};
use crate::headless::{HeadlessEngine, HeadlessProbe};
use crate::queue::{OwnerThread, TaskQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Creates the engine backend; runs once, on the owner thread
pub type BackendFactory =
    Box<dyn FnOnce(&EnvironmentOptions) -> BridgeResult<Rc<dyn EngineBackend>> + Send + 'static>;

type SharedBackend = Arc<OwnerBound<Rc<dyn EngineBackend>>>;

/// Lifecycle of an [`Environment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EnvironmentState {
    Uninitialized = 0,
    Ready = 1,
    TornDown = 2,
}

impl EnvironmentState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Ready,
            _ => Self::TornDown,
        }
    }
}

/// Builder for an [`Environment`]
pub struct EnvironmentBuilder {
    options: EnvironmentOptions,
    backend: Option<BackendFactory>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            options: EnvironmentOptions::default(),
            backend: None,
        }
    }
}

impl EnvironmentBuilder {
    /// Replace all options at once
    pub fn options(mut self, options: EnvironmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Set how the engine backend is created.
    ///
    /// Default is the in-memory headless engine.
    pub fn backend<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&EnvironmentOptions) -> BridgeResult<Rc<dyn EngineBackend>> + Send + 'static,
    {
        self.backend = Some(Box::new(factory));
        self
    }

    /// Use the in-memory headless engine
    pub fn headless(self) -> Self {
        self.backend(|options| Ok(HeadlessEngine::new(options) as Rc<dyn EngineBackend>))
    }

    /// Use the headless engine, reporting into `probe`
    pub fn headless_with(self, probe: HeadlessProbe) -> Self {
        self.backend(move |options| {
            Ok(HeadlessEngine::with_probe(options, probe) as Rc<dyn EngineBackend>)
        })
    }

    /// Bound every blocking call; `None` waits forever
    ///
    /// Default is 30 seconds.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options = self.options.call_timeout(timeout);
        self
    }

    /// Name of the dedicated owner thread
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.options.owner_thread_name = name.into();
        self
    }

    /// Start a dedicated owner thread and create the engine on it
    pub fn spawn(self) -> BridgeResult<Arc<Environment>> {
        let owner = OwnerThread::spawn(self.options.owner_thread_name.clone())?;
        let bridge = Bridge::new(owner.queue().clone(), self.options.timeout());

        let factory = self.backend.unwrap_or_else(default_backend);
        let options = self.options.clone();
        let queue = owner.queue().clone();
        let backend = bridge.call_and_wait(move || {
            factory(&options).and_then(|backend| OwnerBound::new(&queue, backend))
        })??;

        Ok(Environment::assemble(
            bridge,
            self.options,
            backend,
            Some(owner),
        ))
    }

    /// Make the calling thread the owner thread.
    ///
    /// The caller is then responsible for running the queue
    /// ([`TaskQueue::drain`], [`TaskQueue::pump_once`] or [`TaskQueue::run_until_closed`]).
    pub fn bind_current_thread(self) -> BridgeResult<Arc<Environment>> {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue.clone(), self.options.timeout());

        let factory = self.backend.unwrap_or_else(default_backend);
        let backend = OwnerBound::new(&queue, factory(&self.options)?)?;

        Ok(Environment::assemble(bridge, self.options, backend, None))
    }
}

fn default_backend() -> BackendFactory {
    Box::new(|options| Ok(HeadlessEngine::new(options) as Rc<dyn EngineBackend>))
}

/// Root of one engine instance
pub struct Environment {
    bridge: Bridge,
    options: EnvironmentOptions,
    state: AtomicU8,
    backend: Mutex<Option<SharedBackend>>,
    browsers: Mutex<Vec<Weak<Browser>>>,
    owner: Mutex<Option<OwnerThread>>,
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    fn assemble(
        bridge: Bridge,
        options: EnvironmentOptions,
        backend: OwnerBound<Rc<dyn EngineBackend>>,
        owner: Option<OwnerThread>,
    ) -> Arc<Self> {
        let environment = Arc::new(Self {
            bridge,
            options,
            state: AtomicU8::new(EnvironmentState::Uninitialized as u8),
            backend: Mutex::new(Some(Arc::new(backend))),
            browsers: Mutex::new(Vec::new()),
            owner: Mutex::new(owner),
        });
        environment
            .state
            .store(EnvironmentState::Ready as u8, Ordering::Release);
        debug!(
            owner = %environment.bridge.queue().owner_name(),
            timeout_ms = environment.options.call_timeout_ms,
            "Environment ready"
        );
        environment
    }

    pub fn state(&self) -> EnvironmentState {
        EnvironmentState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EnvironmentState::Ready
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    fn backend(&self) -> BridgeResult<SharedBackend> {
        match self.state() {
            EnvironmentState::Ready => {}
            EnvironmentState::TornDown => return Err(BridgeError::EnvironmentGone),
            EnvironmentState::Uninitialized => {
                return Err(BridgeError::invalid_state("environment is not initialized"));
            }
        }
        self.backend
            .lock()
            .clone()
            .ok_or(BridgeError::EnvironmentGone)
    }

    /// Create a browser and wait until the engine reports it ready.
    ///
    /// `handler` receives the browser's events, starting with
    /// [`BrowserEvent::Created`].
    pub fn create_browser(
        self: &Arc<Self>,
        options: BrowserOptions,
        handler: Arc<dyn BrowserEventHandler>,
    ) -> BridgeResult<Arc<Browser>> {
        let backend = self.backend()?;
        let environment = self.clone();

        self.bridge
            .call_deferred(move |completer: Completer<BridgeResult<Arc<Browser>>>| {
                let engine = match backend.get() {
                    Ok(engine) => engine.clone(),
                    Err(e) => return completer.complete(Err(e)),
                };

                let browser = Browser::new(&environment, options.clone(), EventSink::new(handler));
                environment.track(&browser);
                let events: Rc<dyn EngineEvents> = BrowserEvents::new(&browser);

                engine.create_webview(
                    &options,
                    events,
                    Box::new(move |result| {
                        let outcome = result.and_then(|webview| {
                            browser.attach_surface(webview.clone())?;
                            Ok(webview)
                        });
                        match outcome {
                            Ok(webview) => {
                                for event in [REQUEST_PAUSED_EVENT, CONSOLE_MESSAGE_EVENT, FILE_CHOOSER_EVENT] {
                                    webview.subscribe_protocol_event(event);
                                }
                                browser.send_protocol_command("Console.enable", json!({}));
                                browser.send_protocol_command("Page.enable", json!({}));
                                browser.send_protocol_command("DOM.enable", json!({}));
                                browser.events().deliver(&browser, BrowserEvent::Created);
                                completer.complete(Ok(browser));
                            }
                            Err(e) => {
                                warn!(browser = browser.id(), error = %e, "Browser creation failed");
                                browser.destroy();
                                completer.complete(Err(e));
                            }
                        }
                    }),
                );
            })?
    }

    fn track(&self, browser: &Arc<Browser>) {
        let mut browsers = self.browsers.lock();
        browsers.retain(|tracked| {
            tracked
                .upgrade()
                .is_some_and(|tracked| !tracked.is_destroyed())
        });
        browsers.push(Arc::downgrade(browser));
    }

    /// Browsers that have not been destroyed
    pub fn browsers(&self) -> Vec<Arc<Browser>> {
        self.browsers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|browser| !browser.is_destroyed())
            .collect()
    }

    pub fn browser_count(&self) -> usize {
        self.browsers().len()
    }

    /// Version string of the engine runtime
    pub fn runtime_version(&self) -> BridgeResult<String> {
        let backend = self.backend()?;
        self.bridge
            .call_and_wait(move || backend.with(|engine| engine.runtime_version()))??
    }

    pub fn process_infos(&self) -> BridgeResult<Vec<ProcessInfo>> {
        let backend = self.backend()?;
        self.bridge
            .call_and_wait(move || backend.with(|engine| engine.process_infos()))?
    }

    /// Process list as `pid=kind|` entries
    pub fn process_infos_string(&self) -> BridgeResult<String> {
        Ok(format_process_infos(&self.process_infos()?))
    }

    /// Tear the environment down; idempotent.
    ///
    /// Destroys every browser, shuts the engine down on the owner thread and, for a
    /// spawned environment, stops the owner thread.
    pub fn shutdown(&self) -> BridgeResult<()> {
        let previous = self
            .state
            .swap(EnvironmentState::TornDown as u8, Ordering::AcqRel);
        if EnvironmentState::from_raw(previous) == EnvironmentState::TornDown {
            return Ok(());
        }

        let browsers: Vec<Arc<Browser>> = std::mem::take(&mut *self.browsers.lock())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for browser in &browsers {
            browser.destroy();
        }

        let backend = self.backend.lock().take();
        let outcome = match backend {
            Some(backend) => self.bridge.call_and_wait(move || {
                if let Ok(engine) = backend.get() {
                    engine.shutdown();
                }
                drop(backend);
            }),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "Engine shutdown did not complete");
        }

        match self.owner.lock().take() {
            Some(owner) => owner.stop(),
            None => self.bridge.queue().close(),
        }

        debug!(browsers = browsers.len(), "Environment torn down");
        outcome
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!(error = %e, "Environment shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("state", &self.state())
            .field("bridge", &self.bridge)
            .field("browsers", &self.browsers.lock().len())
            .finish()
    }
}

/// Render process infos as `pid=kind|pid=kind|`
pub fn format_process_infos(infos: &[ProcessInfo]) -> String {
    infos
        .iter()
        .map(|info| format!("{}={}|", info.pid, info.kind as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProcessKind;

    #[test]
    fn test_format_process_infos() {
        let infos = [
            ProcessInfo {
                pid: 100,
                kind: ProcessKind::Browser,
            },
            ProcessInfo {
                pid: 204,
                kind: ProcessKind::Gpu,
            },
        ];
        assert_eq!(format_process_infos(&infos), "100=0|204=4|");
        assert_eq!(format_process_infos(&[]), "");
    }

    #[test]
    fn test_bound_environment_lifecycle() {
        let environment = Environment::builder()
            .headless()
            .bind_current_thread()
            .unwrap();
        assert!(environment.is_ready());
        assert!(!environment.runtime_version().unwrap().is_empty());

        environment.shutdown().unwrap();
        assert_eq!(environment.state(), EnvironmentState::TornDown);
        assert!(matches!(
            environment.runtime_version(),
            Err(BridgeError::EnvironmentGone)
        ));
        // Second shutdown is a no-op
        environment.shutdown().unwrap();
    }
}
