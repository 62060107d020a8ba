//! In-memory engine
//!
//! [`HeadlessEngine`] implements the backend traits without a real browser. It is the
//! default backend, used by the CLI's dry runs and by the test suite: navigations
//! commit immediately, scripts and protocol calls are answered from a
//! [`HeadlessProbe`], and engine-initiated requests can be raised on demand with
//! [`drive`].

mod probe;
mod requests;
mod webview;

pub use probe::{HeadlessProbe, ProbeRecord};
pub use requests::{
    HeadlessAuthArgs, HeadlessContextMenuArgs, HeadlessDialogArgs, HeadlessDownload,
    HeadlessDownloadArgs, HeadlessMenuCollection, HeadlessMenuItem, HeadlessNewWindowArgs,
    HeadlessPermissionArgs,
};
pub use webview::{HeadlessCookieStore, HeadlessExtension, HeadlessFrame, HeadlessWebView};

use crate::browser::Browser;
use crate::config::{BrowserOptions, EnvironmentOptions};
use crate::engine::{
    EngineBackend, EngineEvents, ProcessInfo, ProcessKind, WebViewBackend, WebViewCallback,
};
use crate::error::{BridgeError, BridgeResult};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Version reported by [`HeadlessEngine::runtime_version`](EngineBackend::runtime_version)
pub const HEADLESS_VERSION: &str = concat!("headless/", env!("CARGO_PKG_VERSION"));

const DEFAULT_PROFILE: &str = "Default";

pub struct HeadlessEngine {
    extensions_enabled: bool,
    probe: HeadlessProbe,
    shut_down: Cell<bool>,
}

impl HeadlessEngine {
    pub fn new(options: &EnvironmentOptions) -> Rc<Self> {
        Self::with_probe(options, HeadlessProbe::new())
    }

    /// Engine that reports into `probe`
    pub fn with_probe(options: &EnvironmentOptions, probe: HeadlessProbe) -> Rc<Self> {
        Rc::new(Self {
            extensions_enabled: options.enable_extensions,
            probe,
            shut_down: Cell::new(false),
        })
    }

    pub fn probe(&self) -> &HeadlessProbe {
        &self.probe
    }
}

impl EngineBackend for HeadlessEngine {
    fn runtime_version(&self) -> BridgeResult<String> {
        if self.shut_down.get() {
            return Err(BridgeError::engine("engine has shut down"));
        }
        Ok(HEADLESS_VERSION.to_string())
    }

    fn process_infos(&self) -> Vec<ProcessInfo> {
        let pid = std::process::id();
        vec![
            ProcessInfo {
                pid,
                kind: ProcessKind::Browser,
            },
            ProcessInfo {
                pid: pid + 1,
                kind: ProcessKind::Renderer,
            },
        ]
    }

    fn create_webview(
        &self,
        options: &BrowserOptions,
        events: Rc<dyn EngineEvents>,
        ready: WebViewCallback,
    ) {
        if self.shut_down.get() {
            return ready(Err(BridgeError::engine("engine has shut down")));
        }
        let profile = options
            .profile_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        debug!(profile = %profile, private = options.private_mode, "Headless surface created");
        self.probe.record(ProbeRecord::WebViewCreated {
            profile: profile.clone(),
        });
        let webview = HeadlessWebView::new(profile, self.extensions_enabled, events, self.probe.clone());
        ready(Ok(webview as Rc<dyn WebViewBackend>));
    }

    fn shutdown(&self) {
        if !self.shut_down.replace(true) {
            self.probe.record(ProbeRecord::EngineShutdown);
        }
    }
}

/// Run `f` against the headless surface of `browser` on the owner thread and wait
pub fn drive<R, F>(browser: &Arc<Browser>, f: F) -> BridgeResult<R>
where
    R: Send + 'static,
    F: FnOnce(&HeadlessWebView) -> R + Send + 'static,
{
    let target = browser.clone();
    browser.bridge().call_and_wait(move || {
        let webview = target.webview_on_owner()?;
        let headless = webview
            .as_any()
            .downcast_ref::<HeadlessWebView>()
            .ok_or_else(|| BridgeError::invalid_state("browser is not backed by the headless engine"))?;
        Ok(f(headless))
    })?
}
