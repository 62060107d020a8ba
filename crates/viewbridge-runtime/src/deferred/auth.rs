use super::EngineRequest;
use crate::engine::BasicAuthArgs;
use crate::error::BridgeResult;
use std::sync::Arc;

/// A server answered with an HTTP basic authentication challenge
pub struct BasicAuthRequest {
    request: Arc<EngineRequest<dyn BasicAuthArgs>>,
    uri: String,
    challenge: String,
}

impl BasicAuthRequest {
    pub(crate) fn new(
        request: Arc<EngineRequest<dyn BasicAuthArgs>>,
        uri: String,
        challenge: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            request,
            uri,
            challenge,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Answer the challenge
    pub fn set_credentials(&self, user: impl Into<String>, password: impl Into<String>) -> BridgeResult<()> {
        let user = user.into();
        let password = password.into();
        self.request.resolve("basic_auth.set_credentials", move |args| {
            args.set_credentials(&user, &password);
            args.set_cancel(false);
        })
    }

    /// Refuse the challenge
    pub fn cancel(&self) -> BridgeResult<()> {
        self.request
            .resolve("basic_auth.cancel", |args| args.set_cancel(true))
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolution().is_resolved()
    }
}

impl std::fmt::Debug for BasicAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthRequest")
            .field("uri", &self.uri)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
