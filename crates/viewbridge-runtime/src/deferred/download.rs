use super::EngineRequest;
use crate::browser::BrowserObject;
use crate::engine::{DownloadBackend, DownloadStartingArgs, DownloadState};
use crate::error::BridgeResult;
use std::sync::Arc;

/// A download is about to start and waits for confirmation
pub struct DownloadRequest {
    request: Arc<EngineRequest<dyn DownloadStartingArgs>>,
}

impl DownloadRequest {
    pub(crate) fn new(request: Arc<EngineRequest<dyn DownloadStartingArgs>>) -> Arc<Self> {
        Arc::new(Self { request })
    }

    /// The download this request is about
    pub fn operation(&self) -> BridgeResult<Arc<DownloadOperation>> {
        let browser = self.request.resolution().browser()?;
        let request = self.request.clone();
        self.request.bridge().call_and_wait(move || {
            let operation = request.args()?.operation();
            Ok(Arc::new(DownloadOperation {
                object: BrowserObject::new(&browser, operation)?,
            }))
        })?
    }

    pub fn result_path(&self) -> BridgeResult<String> {
        self.request.query(|args| args.result_path())
    }

    pub fn set_cancel(&self, cancel: bool) -> BridgeResult<()> {
        self.request
            .mutate("download.set_cancel", move |args| args.set_cancel(cancel))
    }

    pub fn set_result_path(&self, path: impl Into<String>) -> BridgeResult<()> {
        let path = path.into();
        self.request
            .mutate("download.set_result_path", move |args| args.set_result_path(&path))
    }

    /// Resolve the request; `handled = false` shows the engine's download UI
    pub fn handle(&self, handled: bool) -> BridgeResult<()> {
        self.request
            .resolve("download.handle", move |args| args.set_handled(handled))
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A running download
pub struct DownloadOperation {
    object: BrowserObject<dyn DownloadBackend>,
}

impl DownloadOperation {
    pub fn cancel(&self) -> BridgeResult<()> {
        self.object.post("download.cancel", |download| download.cancel())
    }

    pub fn pause(&self) -> BridgeResult<()> {
        self.object.post("download.pause", |download| download.pause())
    }

    pub fn resume(&self) -> BridgeResult<()> {
        self.object.post("download.resume", |download| download.resume())
    }

    pub fn can_resume(&self) -> BridgeResult<bool> {
        self.object.query(|download| download.can_resume())
    }

    pub fn state(&self) -> BridgeResult<DownloadState> {
        self.object.query(|download| download.state())
    }

    pub fn uri(&self) -> BridgeResult<String> {
        self.object.query(|download| download.uri())
    }

    pub fn result_path(&self) -> BridgeResult<String> {
        self.object.query(|download| download.result_path())
    }

    pub fn mime_type(&self) -> BridgeResult<String> {
        self.object.query(|download| download.mime_type())
    }

    pub fn content_disposition(&self) -> BridgeResult<String> {
        self.object.query(|download| download.content_disposition())
    }

    pub fn total_bytes(&self) -> BridgeResult<i64> {
        self.object.query(|download| download.total_bytes())
    }

    pub fn received_bytes(&self) -> BridgeResult<i64> {
        self.object.query(|download| download.received_bytes())
    }

    pub fn estimated_end_time(&self) -> BridgeResult<String> {
        self.object.query(|download| download.estimated_end_time())
    }
}

impl std::fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOperation").finish_non_exhaustive()
    }
}
