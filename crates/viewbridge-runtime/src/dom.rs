//! Element helpers driven through page script
//!
//! Elements are addressed as `document.querySelectorAll(selector)[index]`. Setters are
//! fire-and-forget; getters evaluate the expression and wait for the JSON result.
//! Node-id queries go through the `DOM.*` protocol domain instead.

use crate::browser::Browser;
use crate::error::{BridgeError, BridgeResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Quote `text` as a JavaScript string literal
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn element(selector: &str, index: u32) -> String {
    format!("document.querySelectorAll({})[{}]", js_string(selector), index)
}

/// Bytes of a `data:` URL, or nothing if it has no payload
fn decode_data_url(url: &str) -> BridgeResult<Vec<u8>> {
    let Some((_, payload)) = url.split_once(',') else {
        return Ok(Vec::new());
    };
    STANDARD
        .decode(payload)
        .map_err(|e| BridgeError::engine(format!("invalid canvas data: {}", e)))
}

/// DOM access for one browser
pub struct DomOperations {
    browser: Weak<Browser>,
}

impl DomOperations {
    pub(crate) fn new(browser: &Arc<Browser>) -> Self {
        Self {
            browser: Arc::downgrade(browser),
        }
    }

    fn browser(&self) -> BridgeResult<Arc<Browser>> {
        self.browser
            .upgrade()
            .filter(|browser| !browser.is_destroyed())
            .ok_or(BridgeError::BrowserGone)
    }

    fn run(&self, script: String) -> BridgeResult<()> {
        self.browser()?.execute_script_async(script, |result| {
            if let Err(e) = result {
                trace!(error = %e, "DOM script failed");
            }
        })
    }

    fn eval(&self, script: String) -> BridgeResult<Value> {
        let raw = self.browser()?.execute_script(script)?;
        Ok(serde_json::from_str(&raw).unwrap_or(Value::Null))
    }

    fn eval_string(&self, script: String) -> BridgeResult<String> {
        match self.eval(script)? {
            Value::String(text) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    fn protocol(&self, method: &str, params: Value) -> BridgeResult<Value> {
        let raw = self
            .browser()?
            .call_protocol_method(method, &params.to_string())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn click(&self, selector: &str, index: u32) -> BridgeResult<()> {
        self.run(format!("{}.click();", element(selector, index)))
    }

    /// Dispatch a bubbling, non-cancelable event named `event`
    pub fn dispatch_event(&self, selector: &str, index: u32, event: &str) -> BridgeResult<()> {
        self.run(format!(
            "{}.dispatchEvent(new Event({}, {{ \"bubbles\": true, \"cancelable\": false }}));",
            element(selector, index),
            js_string(event)
        ))
    }

    pub fn inner_text(&self, selector: &str, index: u32) -> BridgeResult<String> {
        self.eval_string(format!("{}.innerText", element(selector, index)))
    }

    pub fn set_inner_text(&self, selector: &str, index: u32, text: &str) -> BridgeResult<()> {
        self.run(format!("{}.innerText = {};", element(selector, index), js_string(text)))
    }

    pub fn inner_html(&self, selector: &str, index: u32) -> BridgeResult<String> {
        self.eval_string(format!("{}.innerHTML", element(selector, index)))
    }

    pub fn set_inner_html(&self, selector: &str, index: u32, html: &str) -> BridgeResult<()> {
        self.run(format!("{}.innerHTML = {};", element(selector, index), js_string(html)))
    }

    pub fn outer_text(&self, selector: &str, index: u32) -> BridgeResult<String> {
        self.eval_string(format!("{}.outerText", element(selector, index)))
    }

    pub fn outer_html(&self, selector: &str, index: u32) -> BridgeResult<String> {
        self.eval_string(format!("{}.outerHTML", element(selector, index)))
    }

    pub fn value(&self, selector: &str, index: u32) -> BridgeResult<String> {
        self.eval_string(format!("{}.value", element(selector, index)))
    }

    pub fn set_value(&self, selector: &str, index: u32, value: &str) -> BridgeResult<()> {
        self.run(format!("{}.value = {};", element(selector, index), js_string(value)))
    }

    pub fn attribute(&self, selector: &str, index: u32, name: &str) -> BridgeResult<String> {
        self.eval_string(format!(
            "{}.getAttribute({})",
            element(selector, index),
            js_string(name)
        ))
    }

    pub fn set_attribute(&self, selector: &str, index: u32, name: &str, value: &str) -> BridgeResult<()> {
        self.run(format!(
            "{}.setAttribute({}, {});",
            element(selector, index),
            js_string(name),
            js_string(value)
        ))
    }

    pub fn remove_attribute(&self, selector: &str, index: u32, name: &str) -> BridgeResult<()> {
        self.run(format!(
            "{}.removeAttribute({});",
            element(selector, index),
            js_string(name)
        ))
    }

    pub fn is_checked(&self, selector: &str, index: u32) -> BridgeResult<bool> {
        let value = self.eval(format!("{}.checked == true", element(selector, index)))?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub fn set_checked(&self, selector: &str, index: u32, checked: bool) -> BridgeResult<()> {
        self.run(format!("{}.checked = {};", element(selector, index), checked))
    }

    pub fn scroll_to(&self, selector: &str, index: u32, x: i32, y: i32) -> BridgeResult<()> {
        self.run(format!("{}.scrollTo({}, {});", element(selector, index), x, y))
    }

    /// Focus the element, or blur it when `focused` is false
    pub fn set_focus(&self, selector: &str, index: u32, focused: bool) -> BridgeResult<()> {
        let method = if focused { "focus" } else { "blur" };
        self.run(format!("{}.{}();", element(selector, index), method))
    }

    /// PNG bytes of a canvas element
    pub fn canvas_png(&self, selector: &str, index: u32) -> BridgeResult<Vec<u8>> {
        let url = self.eval_string(format!(
            "{}.toDataURL('image/png')",
            element(selector, index)
        ))?;
        decode_data_url(&url)
    }

    /// Node id of the document root
    pub fn document_node(&self) -> BridgeResult<i64> {
        let result = self.protocol("DOM.getDocument", json!({}))?;
        Ok(result["root"]["nodeId"].as_i64().unwrap_or(0))
    }

    /// First node under `node` matching `selector`; `0` if none
    pub fn query_selector(&self, node: i64, selector: &str) -> BridgeResult<i64> {
        let result = self.protocol(
            "DOM.querySelector",
            json!({ "nodeId": node, "selector": selector }),
        )?;
        Ok(result["nodeId"].as_i64().unwrap_or(0))
    }

    pub fn query_selector_all(&self, node: i64, selector: &str) -> BridgeResult<Vec<i64>> {
        let result = self.protocol(
            "DOM.querySelectorAll",
            json!({ "nodeId": node, "selector": selector }),
        )?;
        Ok(result["nodeIds"]
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for DomOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomOperations")
            .field("attached", &(self.browser.strong_count() > 0))
            .finish()
    }
}
