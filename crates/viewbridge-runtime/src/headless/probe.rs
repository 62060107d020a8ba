use crate::engine::FrameId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Something the headless engine observed
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeRecord {
    WebViewCreated { profile: String },
    Navigated { url: String, navigation_id: u64 },
    NavigationRejected { url: String },
    /// A navigation-starting handler asked for cancellation
    NavigationCancelled { url: String, navigation_id: u64 },
    Script { frame: Option<FrameId>, script: String },
    ProtocolCall { method: String, params: String },
    WebMessage { frame: Option<FrameId>, message: String, as_json: bool },
    /// A deferred request was completed; `outcome` is what the embedder chose
    RequestCompleted { request: &'static str, outcome: Value },
    /// A deferral was dropped without being completed
    RequestDropped { request: &'static str },
    WebViewClosed,
    EngineShutdown,
}

#[derive(Default)]
struct ProbeInner {
    records: Mutex<Vec<ProbeRecord>>,
    scripts: Mutex<Vec<(String, String)>>,
    protocol: Mutex<HashMap<String, String>>,
}

/// Thread-safe window into a headless engine.
///
/// Clones share state, so a test keeps one clone and hands another to the engine.
#[derive(Clone, Default)]
pub struct HeadlessProbe {
    inner: Arc<ProbeInner>,
}

impl HeadlessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, record: ProbeRecord) {
        self.inner.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<ProbeRecord> {
        self.inner.records.lock().clone()
    }

    pub fn clear(&self) {
        self.inner.records.lock().clear();
    }

    /// URLs that were committed, in order
    pub fn navigations(&self) -> Vec<String> {
        self.filter(|record| match record {
            ProbeRecord::Navigated { url, .. } => Some(url.clone()),
            _ => None,
        })
    }

    pub fn scripts(&self) -> Vec<String> {
        self.filter(|record| match record {
            ProbeRecord::Script { script, .. } => Some(script.clone()),
            _ => None,
        })
    }

    /// `(method, params)` of every protocol call
    pub fn protocol_calls(&self) -> Vec<(String, String)> {
        self.filter(|record| match record {
            ProbeRecord::ProtocolCall { method, params } => Some((method.clone(), params.clone())),
            _ => None,
        })
    }

    /// `(request, outcome)` of every completed deferral
    pub fn completions(&self) -> Vec<(&'static str, Value)> {
        self.filter(|record| match record {
            ProbeRecord::RequestCompleted { request, outcome } => Some((*request, outcome.clone())),
            _ => None,
        })
    }

    pub fn count(&self, predicate: impl Fn(&ProbeRecord) -> bool) -> usize {
        self.inner.records.lock().iter().filter(|r| predicate(r)).count()
    }

    fn filter<T>(&self, map: impl Fn(&ProbeRecord) -> Option<T>) -> Vec<T> {
        self.inner.records.lock().iter().filter_map(map).collect()
    }

    /// Answer scripts containing `needle` with `json`
    pub fn respond_to_script(&self, needle: impl Into<String>, json: impl Into<String>) {
        self.inner.scripts.lock().push((needle.into(), json.into()));
    }

    /// Answer calls to `method` with `json`
    pub fn respond_to_protocol(&self, method: impl Into<String>, json: impl Into<String>) {
        self.inner.protocol.lock().insert(method.into(), json.into());
    }

    /// Latest responder whose needle occurs in `script`; `null` otherwise
    pub(crate) fn script_response(&self, script: &str) -> String {
        self.inner
            .scripts
            .lock()
            .iter()
            .rev()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, json)| json.clone())
            .unwrap_or_else(|| "null".to_string())
    }

    pub(crate) fn protocol_response(&self, method: &str) -> String {
        self.inner
            .protocol
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| "{}".to_string())
    }
}

impl std::fmt::Debug for HeadlessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessProbe")
            .field("records", &self.inner.records.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_responders_prefer_latest() {
        let probe = HeadlessProbe::new();
        probe.respond_to_script("innerText", "\"first\"");
        probe.respond_to_script("innerText", "\"second\"");

        assert_eq!(probe.script_response("document.body.innerText"), "\"second\"");
        assert_eq!(probe.script_response("1 + 1"), "null");
    }

    #[test]
    fn test_protocol_default_is_empty_object() {
        let probe = HeadlessProbe::new();
        assert_eq!(probe.protocol_response("DOM.getDocument"), "{}");
        probe.respond_to_protocol("DOM.getDocument", r#"{"root":{"nodeId":1}}"#);
        assert_eq!(probe.protocol_response("DOM.getDocument"), r#"{"root":{"nodeId":1}}"#);
    }
}
