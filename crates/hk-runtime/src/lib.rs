pub mod backend;
pub mod capability;
mod helpers;
pub mod host;
pub mod orchestrator;
pub mod results;
pub mod scope;
pub mod transport;

pub use backend::{
    create_backend, EmbeddedInterpreterBackend, ExecutionBackend, IsolatedVmBackend, ScriptEntry,
};
pub use capability::{
    CapabilityTable, HostServices, ModuleHandle, ModuleLoadWarning, ModuleOrigin,
    BUILTIN_MODULES, CURATED_MODULES,
};
pub use host::{dispatch_host_call, HostFunctionRegistry, SandboxHost, SandboxHostParts};
pub use orchestrator::{ScriptRunInput, ScriptRuntime};
pub use results::{ConsoleSink, ResultCollector, INCOMPLETE_TEST_MESSAGE};
pub use scope::{validate_variable_name, ScopeFacade};
pub use transport::{RunRequestByPath, ScriptHttpTransport, TransportRequest, TransportResponse};
