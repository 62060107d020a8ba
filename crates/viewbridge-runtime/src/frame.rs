use crate::browser::{Browser, BrowserObject};
use crate::engine::{FrameBackend, FrameId};
use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    Live,
    Destroyed,
}

/// A sub-document of a browser (iframe)
///
/// Frames are owned by their browser and keyed by the id the engine assigned them.
pub struct Frame {
    id: FrameId,
    object: BrowserObject<dyn FrameBackend>,
    /// Last URL the frame started navigating to
    url: Mutex<String>,
    state: AtomicU8,
}

impl Frame {
    /// Wrap an engine frame; owner thread only
    pub(crate) fn new(browser: &Arc<Browser>, backend: Rc<dyn FrameBackend>) -> BridgeResult<Arc<Self>> {
        let id = backend.id();
        Ok(Arc::new(Self {
            id,
            object: BrowserObject::new(browser, backend)?,
            url: Mutex::new(String::new()),
            state: AtomicU8::new(FrameState::Live as u8),
        }))
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn state(&self) -> FrameState {
        if self.state.load(Ordering::Acquire) == FrameState::Live as u8 {
            FrameState::Live
        } else {
            FrameState::Destroyed
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == FrameState::Destroyed
    }

    pub(crate) fn mark_destroyed(&self) {
        self.state
            .store(FrameState::Destroyed as u8, Ordering::Release);
    }

    pub(crate) fn set_url(&self, url: &str) {
        *self.url.lock() = url.to_string();
    }

    fn ensure_live(&self) -> BridgeResult<()> {
        if self.is_destroyed() {
            return Err(BridgeError::invalid_state(format!(
                "frame {} was destroyed",
                self.id
            )));
        }
        Ok(())
    }

    /// Owning browser, if it still exists
    pub fn browser(&self) -> BridgeResult<Arc<Browser>> {
        self.object.browser()
    }

    pub fn name(&self) -> BridgeResult<String> {
        self.ensure_live()?;
        self.object.query(|frame| frame.name())
    }

    /// Last URL the frame navigated to, empty before its first navigation
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// Evaluate `script` in this frame and wait for its JSON result
    pub fn execute_script(&self, script: impl Into<String>) -> BridgeResult<String> {
        self.ensure_live()?;
        let script = script.into();
        self.object.deferred(move |frame, completer| {
            frame.execute_script(&script, Box::new(move |result| completer.complete(result)))
        })
    }

    /// Evaluate `script` without waiting; `callback` runs on the owner thread
    pub fn execute_script_async<F>(&self, script: impl Into<String>, callback: F) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<String>) + Send + 'static,
    {
        self.ensure_live()?;
        let script = script.into();
        self.object.deferred_async(
            move |frame, reply| {
                frame.execute_script(&script, Box::new(move |result| reply.send(result)))
            },
            callback,
        )
    }

    pub fn post_web_message(&self, message: impl Into<String>, as_json: bool) -> BridgeResult<()> {
        self.ensure_live()?;
        let message = message.into();
        self.object.post("frame.post_web_message", move |frame| {
            frame.post_web_message(&message, as_json)
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("url", &self.url())
            .finish()
    }
}
