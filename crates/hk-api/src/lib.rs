use std::sync::OnceLock;
use std::time::Duration;

use hk_core::{SandboxLimits, ScriptFault, ScriptPhase, ScriptRunOutput};
use hk_digest::{DigestCredentials, DigestInterceptor, OutboundRequest, ReqwestDispatch};
use hk_runtime::{ScriptHttpTransport, ScriptRunInput, ScriptRuntime, TransportRequest, TransportResponse};
use tracing_subscriber::EnvFilter;

pub use hk_core;
pub use hk_digest;
pub use hk_runtime;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`). Safe to
/// call more than once; only the first call has an effect, and an already
/// installed global subscriber is left alone.
pub fn init_tracing() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

pub fn run_script(
    phase: ScriptPhase,
    input: ScriptRunInput,
    limits: &SandboxLimits,
) -> Result<ScriptRunOutput, ScriptFault> {
    ScriptRuntime::new(limits.clone()).run(phase, input)
}

pub fn run_pre_request(input: ScriptRunInput) -> Result<ScriptRunOutput, ScriptFault> {
    run_script(ScriptPhase::PreRequest, input, &SandboxLimits::default())
}

pub fn run_post_response(input: ScriptRunInput) -> Result<ScriptRunOutput, ScriptFault> {
    run_script(ScriptPhase::PostResponse, input, &SandboxLimits::default())
}

/// Puts digest credentials on an outbound request when they are usable.
/// Returns whether the interceptor will be active for it.
pub fn attach_digest(request: &mut OutboundRequest, credentials: &DigestCredentials) -> bool {
    if !credentials.is_usable() {
        tracing::debug!(url = %request.url, "digest credentials incomplete; interceptor not attached");
        return false;
    }
    request.digest = Some(credentials.clone());
    true
}

pub fn digest_client(client: reqwest::Client) -> DigestInterceptor<ReqwestDispatch> {
    DigestInterceptor::new(ReqwestDispatch::new(client))
}

/// Blocking transport for script-side HTTP modules. Must not be called from
/// inside an async runtime.
#[derive(Debug, Clone, Default)]
pub struct BlockingScriptTransport {
    client: reqwest::blocking::Client,
}

impl BlockingScriptTransport {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl ScriptHttpTransport for BlockingScriptTransport {
    fn send(&self, request: TransportRequest) -> Result<TransportResponse, String> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|error| error.to_string())?;
        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        let response = builder.send().map_err(|error| error.to_string())?;
        let status = response.status();
        let mut headers = std::collections::BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        let body = response.text().map_err(|error| error.to_string())?;
        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod api_tests {
    use super::*;
    use hk_core::{BackendKind, RequestDescriptor, ResponseDescriptor};
    use serde_json::json;

    fn input(script: &str, root: &tempfile::TempDir) -> ScriptRunInput {
        ScriptRunInput {
            collection_path: root.path().to_path_buf(),
            collection_name: "api".to_string(),
            backend: BackendKind::EmbeddedInterpreter,
            ..ScriptRunInput::new(script, RequestDescriptor::new("GET", "https://api.test/"))
        }
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialised twice");
    }

    #[test]
    fn pre_request_facade_runs_scripts() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let output = run_pre_request(input("req.setHeader('X-From', 'api');", &root))
            .expect("script should succeed");
        assert_eq!(output.request.header("x-from"), Some("api"));
    }

    #[test]
    fn post_response_facade_sees_the_response() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let mut run = input("bru.setVar('status', res.status);", &root);
        run.response = Some(ResponseDescriptor {
            status: 404,
            ..ResponseDescriptor::default()
        });
        let output = run_post_response(run).expect("script should succeed");
        assert_eq!(output.variables.runtime.get("status"), Some(&json!(404)));
    }

    #[test]
    fn digest_is_only_attached_with_usable_credentials() {
        let mut request = OutboundRequest::new("GET", "https://api.test/");
        assert!(!attach_digest(&mut request, &DigestCredentials::new("u", "")));
        assert!(request.digest.is_none());
        assert!(attach_digest(&mut request, &DigestCredentials::new("u", "p")));
        assert_eq!(request.digest, Some(DigestCredentials::new("u", "p")));
    }

    #[tokio::test]
    async fn digest_client_wraps_a_reqwest_client() {
        let client = digest_client(reqwest::Client::new());
        let request = OutboundRequest::new("GET", "http://[::1");
        assert!(client.execute(request).await.is_err());
    }

    #[test]
    fn scripts_without_transport_fail_http_calls() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let fault = run_pre_request(input(
            "const axios = require('axios'); await axios.get('https://api.test/');",
            &root,
        ))
        .expect_err("no transport is configured");
        assert!(fault.message.contains("no HTTP transport is configured"));
    }
}
