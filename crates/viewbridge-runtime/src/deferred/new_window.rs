use super::EngineRequest;
use crate::browser::Browser;
use crate::engine::{NewWindowArgs, WindowFeatures};
use crate::error::BridgeResult;
use std::sync::Arc;

/// A page asked to open a new window
pub struct NewWindowRequest {
    request: Arc<EngineRequest<dyn NewWindowArgs>>,
}

impl NewWindowRequest {
    pub(crate) fn new(request: Arc<EngineRequest<dyn NewWindowArgs>>) -> Arc<Self> {
        Arc::new(Self { request })
    }

    pub fn uri(&self) -> BridgeResult<String> {
        self.request.query(|args| args.uri())
    }

    pub fn is_user_gesture(&self) -> BridgeResult<bool> {
        self.request.query(|args| args.is_user_gesture())
    }

    pub fn window_features(&self) -> BridgeResult<WindowFeatures> {
        self.request.query(|args| args.window_features())
    }

    /// Show the new window's content in `target` instead of a default popup
    pub fn set_new_window(&self, target: &Arc<Browser>) -> BridgeResult<()> {
        let target = target.clone();
        self.request.resolution().ensure_pending()?;
        let request = self.request.clone();
        self.request.bridge().call_and_wait(move || {
            let webview = target.webview_on_owner()?;
            request.args()?.set_new_window(&webview)
        })?
    }

    /// Resolve the request. `false` lets the engine apply its default handling.
    pub fn set_handled(&self, handled: bool) -> BridgeResult<()> {
        self.request
            .resolve("new_window.set_handled", move |args| args.set_handled(handled))
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }

    pub fn is_detached(&self) -> bool {
        self.request.resolution().is_detached()
    }
}

impl std::fmt::Debug for NewWindowRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewWindowRequest")
            .field("resolved", &self.is_resolved())
            .field("detached", &self.is_detached())
            .finish()
    }
}

