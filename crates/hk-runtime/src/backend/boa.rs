use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsArgs, JsResult, JsString, JsValue, NativeFunction, Source};
use boa_gc::{Finalize, Trace};
use hk_core::{BackendKind, SandboxLimits, ScriptFault};

use super::{ExecutionBackend, ScriptEntry, HOST_CALL_GLOBAL};
use crate::host::{dispatch_host_call, HostFunctionRegistry};

#[derive(Trace, Finalize)]
struct HostCapture {
    #[unsafe_ignore_trace]
    host: Rc<dyn HostFunctionRegistry>,
}

fn host_call(
    _this: &JsValue,
    args: &[JsValue],
    capture: &HostCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let name = args.get_or_undefined(0).to_string(context)?;
    let payload = args.get_or_undefined(1).to_string(context)?;
    let envelope = dispatch_host_call(
        capture.host.as_ref(),
        &name.to_std_string_escaped(),
        &payload.to_std_string_escaped(),
    );
    Ok(JsValue::from(JsString::from(envelope.as_str())))
}

/// Boa interpreter running in the host process. Only modules injected before
/// the run are visible; there is no dynamic `import()`.
pub struct EmbeddedInterpreterBackend {
    limits: SandboxLimits,
}

impl EmbeddedInterpreterBackend {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    fn runtime_limits(&self) -> RuntimeLimits {
        let mut limits = RuntimeLimits::default();
        limits.set_loop_iteration_limit(self.limits.loop_iteration_limit);
        limits.set_recursion_limit(self.limits.recursion_limit);
        limits.set_stack_size_limit(
            (self.limits.max_stack_size_bytes / mem::size_of::<JsValue>()).max(1024),
        );
        limits
    }

    fn evaluate(
        &self,
        entry: &ScriptEntry,
        host: Rc<dyn HostFunctionRegistry>,
    ) -> Result<(), ScriptFault> {
        let mut context = Context::default();
        context.set_runtime_limits(self.runtime_limits());

        let bridge = NativeFunction::from_copy_closure_with_captures(host_call, HostCapture { host });
        context
            .register_global_builtin_callable(JsString::from(HOST_CALL_GLOBAL), 2, bridge)
            .map_err(|error| ScriptFault::engine(error.to_string()))?;

        context
            .eval(Source::from_bytes(entry.prelude))
            .map_err(|error| ScriptFault::engine(format!("prelude failed: {}", error)))?;
        context
            .eval(Source::from_bytes(entry.start))
            .map_err(|error| ScriptFault::engine(error.to_string()))?;
        loop {
            context.run_jobs();
            let fired = context
                .eval(Source::from_bytes(entry.tick))
                .map_err(|error| ScriptFault::engine(error.to_string()))?;
            if !fired.to_boolean() {
                return Ok(());
            }
        }
    }
}

/// Runs `body`, reporting an interpreter panic as an engine fault.
fn contain_panic<F>(body: F) -> Result<(), ScriptFault>
where
    F: FnOnce() -> Result<(), ScriptFault>,
{
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let reason = panic_reason(payload.as_ref());
        tracing::error!(target: "hk_runtime::backend", reason = %reason, "embedded interpreter panicked");
        Err(ScriptFault::engine(format!("interpreter panicked: {}", reason)))
    })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ExecutionBackend for EmbeddedInterpreterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EmbeddedInterpreter
    }

    fn run(
        &self,
        entry: &ScriptEntry,
        host: Rc<dyn HostFunctionRegistry>,
    ) -> Result<(), ScriptFault> {
        contain_panic(|| self.evaluate(entry, host))
    }
}

#[cfg(test)]
mod boa_tests {
    use super::*;

    #[test]
    fn stack_limit_is_counted_in_values() {
        let backend = EmbeddedInterpreterBackend::new(SandboxLimits {
            max_stack_size_bytes: 0,
            ..SandboxLimits::default()
        });
        let limits = backend.runtime_limits();
        assert_eq!(limits.stack_size_limit(), 1024);
        assert_eq!(limits.recursion_limit(), 512);
        assert_eq!(limits.loop_iteration_limit(), 10_000_000);
    }

    #[test]
    fn contain_panic_turns_a_panic_into_an_engine_fault() {
        let fault = contain_panic(|| panic!("opcode out of range"))
            .expect_err("panic should become a fault");
        assert_eq!(fault.kind, hk_core::FaultKind::Engine);
        assert_eq!(fault.message, "interpreter panicked: opcode out of range");

        let formatted = contain_panic(|| panic!("bad binding {}", 7))
            .expect_err("panic should become a fault");
        assert_eq!(formatted.message, "interpreter panicked: bad binding 7");
    }

    #[test]
    fn contain_panic_passes_results_through() {
        assert_eq!(contain_panic(|| Ok(())), Ok(()));
        let fault = contain_panic(|| Err(ScriptFault::engine("limit")))
            .expect_err("fault should pass through");
        assert_eq!(fault.message, "limit");
    }
}
