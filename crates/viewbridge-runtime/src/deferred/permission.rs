use super::EngineRequest;
use crate::engine::{PermissionArgs, PermissionKind, PermissionState};
use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub url: String,
    pub kind: PermissionKind,
    pub is_user_gesture: bool,
}

impl PermissionInfo {
    pub(crate) fn capture(args: &dyn PermissionArgs) -> Self {
        Self {
            url: args.url(),
            kind: args.kind(),
            is_user_gesture: args.is_user_gesture(),
        }
    }
}

/// A page requested access to a guarded capability
pub struct PermissionRequest {
    request: Arc<EngineRequest<dyn PermissionArgs>>,
    info: PermissionInfo,
}

impl PermissionRequest {
    pub(crate) fn new(request: Arc<EngineRequest<dyn PermissionArgs>>, info: PermissionInfo) -> Arc<Self> {
        Arc::new(Self { request, info })
    }

    pub fn info(&self) -> &PermissionInfo {
        &self.info
    }

    pub fn url(&self) -> &str {
        &self.info.url
    }

    pub fn kind(&self) -> PermissionKind {
        self.info.kind
    }

    pub fn is_user_gesture(&self) -> bool {
        self.info.is_user_gesture
    }

    pub fn set_state(&self, state: PermissionState) -> BridgeResult<()> {
        self.request
            .mutate("permission.set_state", move |args| args.set_state(state))
    }

    /// Resolve the request; `handled = false` shows the engine's own prompt
    pub fn process(&self, handled: bool) -> BridgeResult<()> {
        self.request
            .resolve("permission.process", move |args| args.set_handled(handled))
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }
}

impl std::fmt::Debug for PermissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRequest")
            .field("info", &self.info)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
