use std::cell::RefCell;
use std::mem;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use hk_core::{
    BackendKind, ConsoleLevel, HostCallError, RequestDescriptor, ResponseDescriptor, ScriptFault,
    ScriptPhase, VariableOrigin,
};
use serde_json::{json, Value};

use crate::capability::CapabilityTable;
use crate::helpers::args::{arg, arg_opt_str, arg_str, arg_u64};
use crate::helpers::value_path::{parse_value_path, read_value_path};
use crate::results::ResultCollector;
use crate::scope::ScopeFacade;
use crate::transport::RunRequestByPath;

/// Functions reachable from script code through the single `__host_call`
/// bridge. `Ok(None)` reaches the script as `undefined`.
pub trait HostFunctionRegistry {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, HostCallError>;
    fn names(&self) -> &[&'static str];
}

/// Decodes the JSON argument array, calls the registry and encodes the outcome
/// as an envelope the prelude unwraps: `{"value": v}`, `{}` or `{"error": ..}`.
pub fn dispatch_host_call(registry: &dyn HostFunctionRegistry, name: &str, payload: &str) -> String {
    let outcome = serde_json::from_str::<Value>(payload)
        .map_err(|error| HostCallError::invalid(name, format!("arguments are not JSON: {}", error)))
        .and_then(|args| match args {
            Value::Array(args) => registry.call(name, &args),
            Value::Null => registry.call(name, &[]),
            _ => Err(HostCallError::invalid(name, "arguments must be an array")),
        });
    let envelope = match outcome {
        Ok(Some(value)) => json!({ "value": value }),
        Ok(None) => json!({}),
        Err(error) => {
            tracing::trace!(function = name, error = %error, "host call failed");
            json!({ "error": { "name": error.error_name(), "message": error.to_string() } })
        }
    };
    envelope.to_string()
}

const HOST_FUNCTIONS: [&str; 26] = [
    "runtime.info",
    "runtime.source",
    "runtime.settle",
    "runtime.sleep",
    "runtime.runRequest",
    "scope.get",
    "scope.set",
    "scope.has",
    "scope.delete",
    "scope.deleteAll",
    "control.setNextRequest",
    "control.skipRequest",
    "control.stopExecution",
    "request.get",
    "request.set",
    "request.header",
    "request.setHeader",
    "request.deleteHeader",
    "response.get",
    "response.query",
    "tests.begin",
    "tests.settle",
    "console.emit",
    "modules.preload",
    "modules.resolve",
    "modules.call",
];

pub struct SandboxHostParts {
    pub phase: ScriptPhase,
    pub backend: BackendKind,
    pub script: String,
    pub scope: ScopeFacade,
    pub results: Rc<ResultCollector>,
    pub request: RequestDescriptor,
    pub response: Option<ResponseDescriptor>,
    pub modules: CapabilityTable,
    pub run_request: Option<Rc<dyn RunRequestByPath>>,
}

/// Host side of one script run.
pub struct SandboxHost {
    phase: ScriptPhase,
    backend: BackendKind,
    script: String,
    scope: ScopeFacade,
    results: Rc<ResultCollector>,
    request: RefCell<RequestDescriptor>,
    response: Option<ResponseDescriptor>,
    modules: CapabilityTable,
    run_request: Option<Rc<dyn RunRequestByPath>>,
    settlement: RefCell<Option<Result<(), ScriptFault>>>,
}

fn origin_arg(function: &str, args: &[Value]) -> Result<VariableOrigin, HostCallError> {
    VariableOrigin::from_str(arg_str(function, args, 0)?)
        .map_err(|message| HostCallError::invalid(function, message))
}

fn header_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl SandboxHost {
    pub fn new(parts: SandboxHostParts) -> Self {
        Self {
            phase: parts.phase,
            backend: parts.backend,
            script: parts.script,
            scope: parts.scope,
            results: parts.results,
            request: RefCell::new(parts.request),
            response: parts.response,
            modules: parts.modules,
            run_request: parts.run_request,
            settlement: RefCell::new(None),
        }
    }

    pub fn take_settlement(&self) -> Option<Result<(), ScriptFault>> {
        self.settlement.borrow_mut().take()
    }

    pub fn take_request(&self) -> RequestDescriptor {
        mem::take(&mut *self.request.borrow_mut())
    }

    fn collection_root(&self) -> &Path {
        self.modules.collection_root()
    }

    fn info(&self) -> Value {
        json!({
            "phase": self.phase.as_str(),
            "backend": self.backend.as_str(),
            "resolvesModules": self.backend.resolves_modules(),
            "hasResponse": self.response.is_some(),
            "hasRunRequest": self.run_request.is_some(),
            "collectionPath": self.scope.cwd().to_string_lossy(),
            "collectionName": self.scope.collection_name(),
        })
    }

    fn settle(&self, args: &[Value]) -> Result<Option<Value>, HostCallError> {
        let outcome = arg(args, 0);
        let result = if outcome.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            Ok(())
        } else {
            let name = outcome.get("name").and_then(Value::as_str).unwrap_or("Error");
            let message = outcome.get("message").and_then(Value::as_str).unwrap_or_default();
            Err(ScriptFault::uncaught(name, message))
        };
        let mut settlement = self.settlement.borrow_mut();
        if settlement.is_some() {
            return Err(HostCallError::failed("script run already settled"));
        }
        *settlement = Some(result);
        Ok(None)
    }

    fn set_request_field(&self, args: &[Value]) -> Result<Option<Value>, HostCallError> {
        let field = arg_str("request.set", args, 0)?;
        let value = arg(args, 1);
        let mut request = self.request.borrow_mut();
        match field {
            "url" => request.url = header_text(value),
            "method" => request.method = header_text(value),
            "body" => request.body = value.clone(),
            "timeout" => request.timeout = arg_u64(args, 1),
            "maxRedirects" => {
                request.max_redirects = arg_u64(args, 1).map(|count| count.min(u64::from(u32::MAX)) as u32)
            }
            "headers" => {
                let headers = value.as_object().ok_or_else(|| {
                    HostCallError::invalid("request.set", "headers must be an object")
                })?;
                request.headers = headers
                    .iter()
                    .map(|(name, value)| (name.clone(), header_text(value)))
                    .collect();
            }
            other => {
                return Err(HostCallError::invalid(
                    "request.set",
                    format!("request field \"{}\" is read-only or unknown", other),
                ))
            }
        }
        Ok(None)
    }

    fn remove_header(&self, name: &str) {
        self.request
            .borrow_mut()
            .headers
            .retain(|key, _| !key.eq_ignore_ascii_case(name));
    }

    fn query_response(&self, args: &[Value]) -> Result<Option<Value>, HostCallError> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| HostCallError::failed("no response is available in this phase"))?;
        let path = parse_value_path(arg_opt_str(args, 0).unwrap_or_default());
        Ok(read_value_path(&response.body, &path).cloned())
    }

    fn resolve_module(&self, args: &[Value]) -> Result<Option<Value>, HostCallError> {
        let specifier = arg_str("modules.resolve", args, 0)?;
        let handle = if self.backend.resolves_modules() {
            let from_dir = arg_opt_str(args, 1).map(Path::new);
            self.modules.resolve(specifier, from_dir)?
        } else {
            self.modules.lookup(specifier)?
        };
        tracing::trace!(module = specifier, origin = handle.origin().as_str(), "module resolved");
        Ok(Some(handle.descriptor(self.collection_root())))
    }

    fn preload_modules(&self) -> Value {
        if self.backend.resolves_modules() {
            return json!([]);
        }
        Value::Array(
            self.modules
                .modules()
                .map(|handle| handle.descriptor(self.collection_root()))
                .collect(),
        )
    }
}

impl HostFunctionRegistry for SandboxHost {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, HostCallError> {
        match name {
            "runtime.info" => Ok(Some(self.info())),
            "runtime.source" => Ok(Some(json!(self.script))),
            "runtime.settle" => self.settle(args),
            "runtime.sleep" => {
                let millis = arg_u64(args, 0).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(millis));
                Ok(None)
            }
            "runtime.runRequest" => {
                let runner = self
                    .run_request
                    .as_ref()
                    .ok_or_else(|| HostCallError::failed("runRequest is not available"))?;
                let path = arg_str(name, args, 0)?;
                runner
                    .run_request(path)
                    .map(Some)
                    .map_err(HostCallError::failed)
            }
            "scope.get" => Ok(self.scope.get(origin_arg(name, args)?, arg_str(name, args, 1)?)),
            "scope.has" => Ok(Some(json!(self
                .scope
                .has(origin_arg(name, args)?, arg_str(name, args, 1)?)))),
            "scope.set" => {
                let origin = origin_arg(name, args)?;
                let variable = arg_opt_str(args, 1).unwrap_or_default();
                self.scope.set(origin, variable, arg(args, 2).clone())?;
                Ok(None)
            }
            "scope.delete" => {
                let origin = origin_arg(name, args)?;
                self.scope.delete(origin, arg_str(name, args, 1)?)?;
                Ok(None)
            }
            "scope.deleteAll" => {
                self.scope.delete_all(origin_arg(name, args)?)?;
                Ok(None)
            }
            "control.setNextRequest" => {
                self.scope
                    .set_next_request(arg_opt_str(args, 0).map(str::to_string));
                Ok(None)
            }
            "control.skipRequest" => {
                self.scope.skip_request();
                Ok(None)
            }
            "control.stopExecution" => {
                self.scope.stop_execution();
                Ok(None)
            }
            "request.get" => serde_json::to_value(&*self.request.borrow())
                .map(Some)
                .map_err(|error| HostCallError::failed(error.to_string())),
            "request.set" => self.set_request_field(args),
            "request.header" => Ok(self
                .request
                .borrow()
                .header(arg_str(name, args, 0)?)
                .map(|value| json!(value))),
            "request.setHeader" => {
                let header = arg_str(name, args, 0)?;
                self.remove_header(header);
                self.request
                    .borrow_mut()
                    .headers
                    .insert(header.to_string(), header_text(arg(args, 1)));
                Ok(None)
            }
            "request.deleteHeader" => {
                self.remove_header(arg_str(name, args, 0)?);
                Ok(None)
            }
            "response.get" => match &self.response {
                Some(response) => serde_json::to_value(response)
                    .map(Some)
                    .map_err(|error| HostCallError::failed(error.to_string())),
                None => Ok(None),
            },
            "response.query" => self.query_response(args),
            "tests.begin" => {
                let description = arg_opt_str(args, 0).unwrap_or_default();
                Ok(Some(json!(self.results.begin(description))))
            }
            "tests.settle" => {
                let slot = arg_u64(args, 0)
                    .ok_or_else(|| HostCallError::invalid(name, "slot must be a number"))?;
                let error = match arg(args, 1) {
                    Value::Null => None,
                    Value::String(message) => Some(message.clone()),
                    other => Some(other.to_string()),
                };
                self.results.settle(slot as usize, error)?;
                Ok(None)
            }
            "console.emit" => {
                let level = ConsoleLevel::from_str(arg_str(name, args, 0)?)
                    .map_err(|message| HostCallError::invalid(name, message))?;
                let lines = arg(args, 1).as_array().cloned().unwrap_or_default();
                self.results.console(level, &lines);
                Ok(None)
            }
            "modules.preload" => Ok(Some(self.preload_modules())),
            "modules.resolve" => self.resolve_module(args),
            "modules.call" => {
                let module = arg_str(name, args, 0)?;
                let function = arg_str(name, args, 1)?;
                let call_args = arg(args, 2).as_array().cloned().unwrap_or_default();
                self.modules.call(module, function, &call_args).map(Some)
            }
            other => Err(HostCallError::Unknown(other.to_string())),
        }
    }

    fn names(&self) -> &[&'static str] {
        &HOST_FUNCTIONS
    }
}

#[cfg(test)]
mod host_tests {
    use super::*;
    use crate::capability::HostServices;
    use hk_core::{ScriptingConfig, VariableSnapshot};

    fn host(backend: BackendKind, response: Option<ResponseDescriptor>) -> (SandboxHost, tempfile::TempDir) {
        let root = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(root.path().join("lib.js"), "module.exports = 1;").expect("write lib");
        let mut request = RequestDescriptor::new("GET", "https://api.test/items");
        request
            .headers
            .insert("X-Trace".to_string(), "1".to_string());
        let host = SandboxHost::new(SandboxHostParts {
            phase: ScriptPhase::PreRequest,
            backend,
            script: "return 1;".to_string(),
            scope: ScopeFacade::new(VariableSnapshot::default(), root.path(), "demo"),
            results: Rc::new(ResultCollector::new(Vec::new(), None)),
            request,
            response,
            modules: CapabilityTable::build(
                &ScriptingConfig::default(),
                root.path(),
                &HostServices::default(),
            ),
            run_request: None,
        });
        (host, root)
    }

    fn envelope(host: &SandboxHost, name: &str, args: Value) -> Value {
        serde_json::from_str(&dispatch_host_call(host, name, &args.to_string()))
            .expect("envelope should be JSON")
    }

    #[test]
    fn envelopes_distinguish_values_undefined_and_errors() {
        let (host, _root) = host(BackendKind::IsolatedVm, None);
        assert_eq!(
            envelope(&host, "runtime.source", json!([])),
            json!({ "value": "return 1;" })
        );
        assert_eq!(
            envelope(&host, "scope.get", json!(["runtime", "missing"])),
            json!({})
        );
        assert_eq!(
            envelope(&host, "scope.set", json!(["processEnv", "HOME", "x"])),
            json!({ "error": { "name": "Error", "message": "processEnv variables are read-only" } })
        );
        assert_eq!(
            envelope(&host, "nope", json!([]))["error"]["name"],
            json!("ReferenceError")
        );
        let malformed = dispatch_host_call(&host, "scope.get", "{not json");
        assert!(malformed.contains("TypeError"));
    }

    #[test]
    fn request_edits_apply_in_place() {
        let (host, _root) = host(BackendKind::IsolatedVm, None);
        envelope(&host, "request.set", json!(["url", "https://api.test/v2"]));
        envelope(&host, "request.set", json!(["timeout", 5000]));
        envelope(&host, "request.setHeader", json!(["x-trace", "2"]));
        envelope(&host, "request.setHeader", json!(["Accept", "application/json"]));
        envelope(&host, "request.deleteHeader", json!(["accept"]));
        let denied = envelope(&host, "request.set", json!(["authMode", "basic"]));
        assert_eq!(denied["error"]["name"], json!("TypeError"));

        let request = host.take_request();
        assert_eq!(request.url, "https://api.test/v2");
        assert_eq!(request.timeout, Some(5000));
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("X-TRACE"), Some("2"));
    }

    #[test]
    fn response_query_reads_body_paths() {
        let response = ResponseDescriptor {
            status: 200,
            body: json!({ "data": { "items": [{ "id": 3 }] } }),
            ..ResponseDescriptor::default()
        };
        let (host, _root) = host(BackendKind::IsolatedVm, Some(response));
        assert_eq!(
            envelope(&host, "response.query", json!(["data.items[0].id"])),
            json!({ "value": 3 })
        );
        assert_eq!(envelope(&host, "response.query", json!(["data.nope"])), json!({}));
    }

    #[test]
    fn settle_records_the_first_outcome_only() {
        let (host, _root) = host(BackendKind::IsolatedVm, None);
        envelope(
            &host,
            "runtime.settle",
            json!([{ "ok": false, "name": "TypeError", "message": "boom" }]),
        );
        let second = envelope(&host, "runtime.settle", json!([{ "ok": true }]));
        assert!(second.get("error").is_some());
        assert_eq!(
            host.take_settlement(),
            Some(Err(ScriptFault::uncaught("TypeError", "boom")))
        );
    }

    #[test]
    fn module_resolution_depends_on_the_backend() {
        let (isolated, _root) = host(BackendKind::IsolatedVm, None);
        let descriptor = envelope(&isolated, "modules.resolve", json!(["./lib", null]));
        assert_eq!(descriptor["value"]["source"], json!("module.exports = 1;"));
        assert_eq!(envelope(&isolated, "modules.preload", json!([])), json!({ "value": [] }));

        let (embedded, _root) = host(BackendKind::EmbeddedInterpreter, None);
        let denied = envelope(&embedded, "modules.resolve", json!(["./lib", null]));
        assert_eq!(denied["error"]["name"], json!("CapabilityDenied"));
        let preloaded = envelope(&embedded, "modules.preload", json!([]));
        let names = preloaded["value"]
            .as_array()
            .expect("preload returns a list")
            .iter()
            .filter_map(|descriptor| descriptor["name"].as_str())
            .collect::<Vec<_>>();
        assert!(names.contains(&"lodash"));
        assert!(names.contains(&"path"));
        assert!(!names.contains(&"fs"));
    }

    #[test]
    fn registry_lists_every_host_function() {
        let (host, _root) = host(BackendKind::IsolatedVm, None);
        assert!(host.names().contains(&"tests.begin"));
        assert!(host.names().contains(&"modules.call"));
    }
}
