//! Network interception tokens
//!
//! Interception runs over the engine's protocol channel. A paused request without a
//! response status is in the request stage; one with a status is in the response
//! stage. Resolving either sends the matching `Fetch.*` command.

use super::{Detach, Resolution};
use crate::browser::Browser;
use crate::error::{BridgeError, BridgeResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// One header as the protocol represents it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Parse `Name: Value` lines separated by `\n`.
///
/// Both sides are trimmed; lines without a `:` are skipped.
pub fn parse_header_lines(raw: &str) -> Vec<HeaderEntry> {
    raw.split('\n')
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| HeaderEntry {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        })
        .filter(|header| !header.name.is_empty())
        .collect()
}

/// Snapshot of a paused request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptedRequest {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub post_data: Option<String>,
    pub resource_type: String,
    pub frame_id: String,
}

impl InterceptedRequest {
    /// Read a `Fetch.requestPaused` payload
    pub fn from_paused_event(params: &Value) -> BridgeResult<Self> {
        let request_id = params
            .get("requestId")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::invalid_argument("requestPaused without requestId"))?;
        let request = params.get("request").cloned().unwrap_or(Value::Null);
        let text = |value: &Value, key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let headers = request
            .get("headers")
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, value)| {
                        (name.clone(), value.as_str().unwrap_or_default().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            request_id: request_id.to_string(),
            url: text(&request, "url"),
            method: text(&request, "method"),
            headers,
            post_data: request
                .get("postData")
                .and_then(Value::as_str)
                .map(str::to_string),
            resource_type: text(params, "resourceType"),
            frame_id: text(params, "frameId"),
        })
    }
}

/// Replacement values for a continued request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOverrides {
    pub url: String,
    pub method: String,
    pub post_data: String,
    /// `Name: Value` lines separated by `\n`
    pub headers: String,
}

/// Replacement values for a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseOverrides {
    pub status_code: i32,
    pub phrase: String,
    /// `Name: Value` lines separated by `\n`
    pub headers: String,
}

fn header_array(raw: &str, key_field: &str) -> Value {
    Value::Array(
        parse_header_lines(raw)
            .into_iter()
            .map(|header| {
                let mut item = Map::new();
                item.insert(key_field.to_string(), Value::String(header.name));
                item.insert("value".to_string(), Value::String(header.value));
                Value::Object(item)
            })
            .collect(),
    )
}

fn decode_body(result: &str) -> BridgeResult<Vec<u8>> {
    let value: Value = serde_json::from_str(result)?;
    let Some(body) = value.get("body").and_then(Value::as_str) else {
        return Ok(Vec::new());
    };
    if value
        .get("base64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        STANDARD
            .decode(body)
            .map_err(|e| BridgeError::engine(format!("invalid response body encoding: {}", e)))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

/// A request paused before it was sent
pub struct RequestIntercept {
    resolution: Resolution,
    request: InterceptedRequest,
}

impl RequestIntercept {
    pub(crate) fn new(browser: &Arc<Browser>, request: InterceptedRequest) -> Arc<Self> {
        let token = Arc::new(Self {
            resolution: Resolution::new(browser),
            request,
        });
        let weak: Weak<dyn Detach> = Arc::downgrade(&token) as Weak<dyn Detach>;
        browser.pending_requests().register(weak);
        token
    }

    pub fn request(&self) -> &InterceptedRequest {
        &self.request
    }

    /// Let the request proceed, optionally rewritten; the response stage is
    /// intercepted as well
    pub fn continue_request(&self, overrides: Option<RequestOverrides>) -> BridgeResult<()> {
        let mut params = json!({
            "requestId": self.request.request_id,
            "interceptResponse": true,
        });
        if let Some(overrides) = overrides {
            params["url"] = Value::String(overrides.url);
            params["method"] = Value::String(overrides.method);
            params["postData"] = Value::String(overrides.post_data);
            params["headers"] = header_array(&overrides.headers, "key");
        }

        let browser = self.resolution.claim("intercept.continue_request")?;
        browser.send_protocol_command("Fetch.continueRequest", params);
        Ok(())
    }

    /// Abort the request; an empty reason becomes `Failed`
    pub fn fail(&self, reason: &str) -> BridgeResult<()> {
        let reason = if reason.is_empty() { "Failed" } else { reason };
        let params = json!({
            "requestId": self.request.request_id,
            "errorReason": reason,
        });

        let browser = self.resolution.claim("intercept.fail")?;
        browser.send_protocol_command("Fetch.failRequest", params);
        Ok(())
    }

    /// Answer the request without contacting the server
    pub fn fulfill(&self, response: ResponseOverrides, body: &[u8]) -> BridgeResult<()> {
        let params = json!({
            "requestId": self.request.request_id,
            "responseCode": response.status_code,
            "responsePhrase": response.phrase,
            "responseHeaders": header_array(&response.headers, "name"),
            "body": STANDARD.encode(body),
        });

        let browser = self.resolution.claim("intercept.fulfill")?;
        browser.send_protocol_command("Fetch.fulfillRequest", params);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }
}

impl Detach for RequestIntercept {
    fn detach(&self) {
        self.resolution.detach();
    }
}

impl std::fmt::Debug for RequestIntercept {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestIntercept")
            .field("request_id", &self.request.request_id)
            .field("url", &self.request.url)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A response paused before it reached the page
pub struct ResponseIntercept {
    resolution: Resolution,
    request: InterceptedRequest,
    status_code: i32,
    status_text: String,
    /// Headers exactly as the engine reported them
    raw_headers: Value,
}

impl ResponseIntercept {
    pub(crate) fn new(browser: &Arc<Browser>, request: InterceptedRequest, params: &Value) -> Arc<Self> {
        let token = Arc::new(Self {
            resolution: Resolution::new(browser),
            request,
            status_code: params
                .get("responseStatusCode")
                .and_then(Value::as_i64)
                .unwrap_or_default() as i32,
            status_text: params
                .get("responseStatusText")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            raw_headers: params
                .get("responseHeaders")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        });
        let weak: Weak<dyn Detach> = Arc::downgrade(&token) as Weak<dyn Detach>;
        browser.pending_requests().register(weak);
        token
    }

    pub fn request(&self) -> &InterceptedRequest {
        &self.request
    }

    pub fn status_code(&self) -> i32 {
        self.status_code
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> Vec<HeaderEntry> {
        serde_json::from_value(self.raw_headers.clone()).unwrap_or_default()
    }

    /// Fetch the response body and wait for it
    pub fn body(&self) -> BridgeResult<Vec<u8>> {
        let browser = self.resolution.ensure_pending()?;
        let result = browser.call_protocol_method(
            "Fetch.getResponseBody",
            &json!({ "requestId": self.request.request_id }).to_string(),
        )?;
        decode_body(&result)
    }

    /// Fetch the response body; `callback` runs on the owner thread
    pub fn body_async<F>(&self, callback: F) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<Vec<u8>>) + Send + 'static,
    {
        let browser = self.resolution.ensure_pending()?;
        browser.call_protocol_method_async(
            "Fetch.getResponseBody",
            &json!({ "requestId": self.request.request_id }).to_string(),
            move |result| callback(result.and_then(|raw| decode_body(&raw))),
        )
    }

    fn response_params(&self, overrides: Option<ResponseOverrides>) -> Value {
        let mut params = json!({ "requestId": self.request.request_id });
        match overrides {
            Some(overrides) => {
                params["responseCode"] = json!(overrides.status_code);
                params["responsePhrase"] = Value::String(overrides.phrase);
                params["responseHeaders"] = header_array(&overrides.headers, "name");
            }
            None => {
                params["responseCode"] = json!(self.status_code);
                params["responseHeaders"] = self.raw_headers.clone();
            }
        }
        params
    }

    /// Let the response reach the page, optionally with a new status or headers
    pub fn continue_response(&self, overrides: Option<ResponseOverrides>) -> BridgeResult<()> {
        let params = self.response_params(overrides);
        let browser = self.resolution.claim("intercept.continue_response")?;
        browser.send_protocol_command("Fetch.continueResponse", params);
        Ok(())
    }

    /// Replace the response body; without overrides the original status and headers
    /// are kept
    pub fn fulfill(&self, overrides: Option<ResponseOverrides>, body: &[u8]) -> BridgeResult<()> {
        let mut params = self.response_params(overrides);
        params["body"] = Value::String(STANDARD.encode(body));
        let browser = self.resolution.claim("intercept.fulfill_response")?;
        browser.send_protocol_command("Fetch.fulfillRequest", params);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }
}

impl Detach for ResponseIntercept {
    fn detach(&self) {
        self.resolution.detach();
    }
}

impl std::fmt::Debug for ResponseIntercept {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseIntercept")
            .field("request_id", &self.request.request_id)
            .field("status_code", &self.status_code)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_lines() {
        let headers = parse_header_lines("Content-Type: text/html\n X-Trace :  abc:def \n\nbroken");
        assert_eq!(
            headers,
            vec![
                HeaderEntry {
                    name: "Content-Type".to_string(),
                    value: "text/html".to_string(),
                },
                HeaderEntry {
                    name: "X-Trace".to_string(),
                    value: "abc:def".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_header_array_field_names() {
        let request_style = header_array("A: 1", "key");
        assert_eq!(request_style, json!([{ "key": "A", "value": "1" }]));

        let response_style = header_array("A: 1", "name");
        assert_eq!(response_style, json!([{ "name": "A", "value": "1" }]));
    }

    #[test]
    fn test_paused_event_snapshot() {
        let params = json!({
            "requestId": "interception-7",
            "request": {
                "url": "https://example.com/api",
                "method": "POST",
                "headers": { "Accept": "application/json" },
                "postData": "{}"
            },
            "resourceType": "XHR",
            "frameId": "main"
        });

        let request = InterceptedRequest::from_paused_event(&params).unwrap();
        assert_eq!(request.request_id, "interception-7");
        assert_eq!(request.method, "POST");
        assert_eq!(request.headers.get("Accept").map(String::as_str), Some("application/json"));
        assert_eq!(request.post_data.as_deref(), Some("{}"));
        assert_eq!(request.resource_type, "XHR");

        assert!(InterceptedRequest::from_paused_event(&json!({})).is_err());
    }

    #[test]
    fn test_decode_body() {
        let encoded = json!({ "body": STANDARD.encode(b"\x00binary"), "base64Encoded": true });
        assert_eq!(decode_body(&encoded.to_string()).unwrap(), b"\x00binary".to_vec());

        let plain = json!({ "body": "hello", "base64Encoded": false });
        assert_eq!(decode_body(&plain.to_string()).unwrap(), b"hello".to_vec());

        assert!(decode_body("{}").unwrap().is_empty());
    }
}
