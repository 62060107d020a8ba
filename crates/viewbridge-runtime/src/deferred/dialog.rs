use super::EngineRequest;
use crate::engine::{ScriptDialogArgs, ScriptDialogKind};
use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Dialog details captured when the dialog was raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDialogInfo {
    pub url: String,
    pub kind: ScriptDialogKind,
    pub message: String,
    pub default_text: String,
}

impl ScriptDialogInfo {
    pub(crate) fn capture(args: &dyn ScriptDialogArgs) -> Self {
        Self {
            url: args.url(),
            kind: args.kind(),
            message: args.message(),
            default_text: args.default_text(),
        }
    }
}

/// A page called `alert`, `confirm`, `prompt` or raised a before-unload dialog
pub struct ScriptDialogRequest {
    request: Arc<EngineRequest<dyn ScriptDialogArgs>>,
    info: ScriptDialogInfo,
}

impl ScriptDialogRequest {
    pub(crate) fn new(request: Arc<EngineRequest<dyn ScriptDialogArgs>>, info: ScriptDialogInfo) -> Arc<Self> {
        Arc::new(Self { request, info })
    }

    pub fn info(&self) -> &ScriptDialogInfo {
        &self.info
    }

    pub fn url(&self) -> &str {
        &self.info.url
    }

    pub fn kind(&self) -> ScriptDialogKind {
        self.info.kind
    }

    pub fn message(&self) -> &str {
        &self.info.message
    }

    pub fn default_text(&self) -> &str {
        &self.info.default_text
    }

    /// Answer the dialog as if OK was pressed
    pub fn accept(&self) -> BridgeResult<()> {
        self.request.mutate("script_dialog.accept", |args| args.accept())
    }

    /// Text returned from `prompt`
    pub fn set_input(&self, text: impl Into<String>) -> BridgeResult<()> {
        let text = text.into();
        self.request
            .mutate("script_dialog.set_input", move |args| args.set_result_text(&text))
    }

    /// Close the dialog with whatever answer was set
    pub fn process(&self) -> BridgeResult<()> {
        self.request.resolve("script_dialog.process", |_| {})
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }
}

impl std::fmt::Debug for ScriptDialogRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptDialogRequest")
            .field("info", &self.info)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
