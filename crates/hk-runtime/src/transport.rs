use std::collections::BTreeMap;
use std::rc::Rc;

use hk_core::HostCallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::NativeFn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Outbound HTTP for the `http`, `https`, `axios`, `node-fetch` and
/// `node-vault` modules. Scripts have no other route to the network.
pub trait ScriptHttpTransport {
    fn send(&self, request: TransportRequest) -> Result<TransportResponse, String>;
}

/// Executes another request of the collection by its path (`bru.runRequest`).
pub trait RunRequestByPath {
    fn run_request(&self, path: &str) -> Result<Value, String>;
}

pub(crate) fn transport_native(
    module: &'static str,
    transport: Option<Rc<dyn ScriptHttpTransport>>,
) -> NativeFn {
    Rc::new(move |args: &[Value]| {
        let transport = transport.as_ref().ok_or_else(|| {
            HostCallError::failed(format!(
                "{}: no HTTP transport is configured for scripts",
                module
            ))
        })?;
        let request: TransportRequest =
            serde_json::from_value(args.first().cloned().unwrap_or(Value::Null)).map_err(
                |error| HostCallError::invalid("send", format!("malformed request: {}", error)),
            )?;
        if request.url.is_empty() {
            return Err(HostCallError::invalid("send", "request url is required"));
        }
        tracing::debug!(module, method = %request.method, url = %request.url, "script http request");
        let response = transport
            .send(request)
            .map_err(|message| HostCallError::failed(format!("{}: {}", module, message)))?;
        serde_json::to_value(response).map_err(|error| HostCallError::failed(error.to_string()))
    })
}

#[cfg(test)]
mod transport_tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct EchoTransport {
        seen: RefCell<Vec<TransportRequest>>,
    }

    impl ScriptHttpTransport for EchoTransport {
        fn send(&self, request: TransportRequest) -> Result<TransportResponse, String> {
            let body = request.body.clone().unwrap_or_default();
            self.seen.borrow_mut().push(request);
            Ok(TransportResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: BTreeMap::new(),
                body,
            })
        }
    }

    #[test]
    fn native_forwards_requests_to_the_transport() {
        let transport = Rc::new(EchoTransport::default());
        let native = transport_native("axios", Some(transport.clone()));
        let response = native(&[json!({
            "method": "POST",
            "url": "https://api.test/items",
            "headers": { "content-type": "application/json" },
            "body": "{\"a\":1}"
        })])
        .expect("send should succeed");
        assert_eq!(response["status"], json!(200));
        assert_eq!(response["body"], json!("{\"a\":1}"));
        assert_eq!(transport.seen.borrow()[0].method, "POST");
    }

    #[test]
    fn native_without_transport_fails_descriptively() {
        let native = transport_native("node-fetch", None);
        let error = native(&[json!({ "method": "GET", "url": "https://api.test" })])
            .expect_err("no transport");
        assert_eq!(
            error.to_string(),
            "node-fetch: no HTTP transport is configured for scripts"
        );
    }
}
