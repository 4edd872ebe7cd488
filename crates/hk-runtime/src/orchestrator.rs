use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use hk_core::{
    BackendKind, RequestDescriptor, ResponseDescriptor, SandboxLimits, ScriptFault,
    ScriptPhase, ScriptRunOutput, ScriptingConfig, TestResult, VariableSnapshot,
};

use crate::backend::{create_backend, ScriptEntry};
use crate::capability::{CapabilityTable, HostServices};
use crate::host::{HostFunctionRegistry, SandboxHost, SandboxHostParts};
use crate::results::{ConsoleSink, ResultCollector};
use crate::scope::ScopeFacade;
use crate::transport::{RunRequestByPath, ScriptHttpTransport};

pub const UNSETTLED_MESSAGE: &str = "script did not settle";
pub const MISSING_RESPONSE_MESSAGE: &str = "post-response scripts require a response";

/// Everything one script run sees. Built fresh by the caller per invocation.
#[derive(Default)]
pub struct ScriptRunInput {
    pub script: String,
    pub request: RequestDescriptor,
    pub response: Option<ResponseDescriptor>,
    pub variables: VariableSnapshot,
    pub prior_results: Vec<TestResult>,
    pub config: ScriptingConfig,
    pub collection_path: PathBuf,
    pub collection_name: String,
    pub backend: BackendKind,
    pub console: Option<Rc<dyn ConsoleSink>>,
    pub run_request: Option<Rc<dyn RunRequestByPath>>,
    pub http: Option<Rc<dyn ScriptHttpTransport>>,
}

impl ScriptRunInput {
    pub fn new(script: impl Into<String>, request: RequestDescriptor) -> Self {
        Self {
            script: script.into(),
            request,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptRuntime {
    limits: SandboxLimits,
}

impl ScriptRuntime {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn run_request_script(&self, input: ScriptRunInput) -> Result<ScriptRunOutput, ScriptFault> {
        self.run(ScriptPhase::PreRequest, input)
    }

    pub fn run_response_script(&self, input: ScriptRunInput) -> Result<ScriptRunOutput, ScriptFault> {
        self.run(ScriptPhase::PostResponse, input)
    }

    pub fn run(&self, phase: ScriptPhase, input: ScriptRunInput) -> Result<ScriptRunOutput, ScriptFault> {
        let span = tracing::info_span!(
            "script_run",
            phase = phase.as_str(),
            backend = input.backend.as_str()
        );
        let _entered = span.enter();

        if phase == ScriptPhase::PostResponse && input.response.is_none() {
            return Err(ScriptFault::engine(MISSING_RESPONSE_MESSAGE));
        }

        let started = Instant::now();
        let services = HostServices { http: input.http };
        let modules = CapabilityTable::build(&input.config, &input.collection_path, &services);
        let scope = ScopeFacade::new(input.variables, &input.collection_path, input.collection_name);
        let results = Rc::new(ResultCollector::new(input.prior_results, input.console));
        let response = input.response;
        let host = Rc::new(SandboxHost::new(SandboxHostParts {
            phase,
            backend: input.backend,
            script: input.script,
            scope: scope.clone(),
            results: results.clone(),
            request: input.request,
            response: response.clone(),
            modules,
            run_request: input.run_request,
        }));

        tracing::info!("script run started");
        let backend = create_backend(input.backend, &self.limits);
        let registry: Rc<dyn HostFunctionRegistry> = host.clone();
        let ran = backend.run(&ScriptEntry::new(phase), registry);
        let outcome = match (host.take_settlement(), ran) {
            (Some(settled), _) => settled,
            (None, Err(fault)) => Err(fault),
            (None, Ok(())) => Err(ScriptFault::engine(UNSETTLED_MESSAGE)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(fault) = outcome {
            tracing::info!(code = fault.code(), error = %fault, elapsed_ms, "script run faulted");
            return Err(fault);
        }

        let (variables, control) = scope.take();
        let output = ScriptRunOutput {
            request: host.take_request(),
            response,
            variables,
            test_results: results.take_results(),
            control,
        };
        tracing::info!(
            tests = output.test_results.len(),
            elapsed_ms,
            "script run finished"
        );
        Ok(output)
    }
}
