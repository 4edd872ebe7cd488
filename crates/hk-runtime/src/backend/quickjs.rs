use std::rc::Rc;

use hk_core::{BackendKind, SandboxLimits, ScriptFault};
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{CatchResultExt, Context, Ctx, Function, Module, Runtime, Value};

use super::{ExecutionBackend, ScriptEntry, HOST_CALL_GLOBAL};
use crate::host::{dispatch_host_call, HostFunctionRegistry};

const IMPORT_PREFIX: &str = "sandbox-import:";

/// QuickJS calls the interrupt handler once its operation counter, decremented
/// on every backward jump and call, runs down from this value.
const OPERATIONS_PER_POLL: u64 = 10_000;

/// Interrupt polls allowed for a loop iteration limit, never less than one.
fn poll_budget(loop_iteration_limit: u64) -> u64 {
    loop_iteration_limit.div_ceil(OPERATIONS_PER_POLL).max(1)
}

/// Routes every `import()` specifier to a synthetic module name.
struct SandboxResolver;

impl Resolver for SandboxResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, _base: &str, name: &str) -> rquickjs::Result<String> {
        if name.starts_with(IMPORT_PREFIX) {
            return Ok(name.to_string());
        }
        Ok(format!("{}{}", IMPORT_PREFIX, name))
    }
}

/// Declares a module whose default export is whatever `require` yields for
/// the same specifier, so imports go through the capability table too.
struct SandboxLoader;

impl Loader for SandboxLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let specifier = name.strip_prefix(IMPORT_PREFIX).unwrap_or(name);
        let source = format!(
            "export default globalThis.__sandbox_require({});",
            serde_json::Value::String(specifier.to_string())
        );
        Module::declare(ctx.clone(), name, source)
    }
}

/// QuickJS runtime with its own heap. Resolves `require` and `import()` on
/// demand through the host.
pub struct IsolatedVmBackend {
    limits: SandboxLimits,
}

impl IsolatedVmBackend {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    fn drain_jobs(&self, runtime: &Runtime, entry: &ScriptEntry, job_failure: &mut Option<String>) {
        loop {
            match runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(exception) => {
                    let message = exception.0.with(|ctx| describe_exception(ctx.catch()));
                    tracing::warn!(
                        backend = %self.kind(),
                        phase = entry.phase.as_str(),
                        error = %message,
                        "pending job failed"
                    );
                    job_failure.get_or_insert(message);
                }
            }
        }
    }
}

fn engine_fault(error: rquickjs::Error) -> ScriptFault {
    ScriptFault::engine(error.to_string())
}

fn describe_exception(value: Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    value
        .as_string()
        .and_then(|text| text.to_string().ok())
        .unwrap_or_else(|| "uncaught exception".to_string())
}

impl ExecutionBackend for IsolatedVmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IsolatedVm
    }

    fn run(
        &self,
        entry: &ScriptEntry,
        host: Rc<dyn HostFunctionRegistry>,
    ) -> Result<(), ScriptFault> {
        let runtime = Runtime::new().map_err(engine_fault)?;
        runtime.set_memory_limit(self.limits.memory_limit_bytes);
        runtime.set_max_stack_size(self.limits.max_stack_size_bytes);
        runtime.set_loader(SandboxResolver, SandboxLoader);
        let budget = poll_budget(self.limits.loop_iteration_limit);
        let mut polls = 0u64;
        runtime.set_interrupt_handler(Some(Box::new(move || {
            polls += 1;
            polls > budget
        })));

        let context = Context::full(&runtime).map_err(engine_fault)?;
        context.with(|ctx| -> Result<(), ScriptFault> {
            let bridge = host.clone();
            let host_call = Function::new(ctx.clone(), move |name: String, payload: String| {
                dispatch_host_call(bridge.as_ref(), &name, &payload)
            })
            .map_err(engine_fault)?;
            ctx.globals()
                .set(HOST_CALL_GLOBAL, host_call)
                .map_err(engine_fault)?;
            ctx.eval::<(), _>(entry.prelude)
                .catch(&ctx)
                .map_err(|error| ScriptFault::engine(format!("prelude failed: {}", error)))?;
            ctx.eval::<(), _>(entry.start)
                .catch(&ctx)
                .map_err(|error| ScriptFault::engine(error.to_string()))?;
            Ok(())
        })?;

        let mut job_failure = None;
        loop {
            self.drain_jobs(&runtime, entry, &mut job_failure);
            let fired = context.with(|ctx| {
                ctx.eval::<bool, _>(entry.tick)
                    .catch(&ctx)
                    .map_err(|error| ScriptFault::engine(error.to_string()))
            })?;
            if !fired {
                break;
            }
        }
        match job_failure {
            Some(message) => Err(ScriptFault::engine(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod quickjs_tests {
    use super::*;

    #[test]
    fn poll_budget_scales_the_iteration_limit() {
        assert_eq!(poll_budget(10_000_000), 1_000);
        assert_eq!(poll_budget(25_000), 3);
        assert_eq!(poll_budget(1), 1);
        assert_eq!(poll_budget(0), 1);
    }

    #[test]
    fn resolver_prefixes_bare_and_relative_specifiers() {
        let runtime = Runtime::new().expect("runtime should start");
        let context = Context::full(&runtime).expect("context should start");
        context.with(|ctx| {
            let mut resolver = SandboxResolver;
            assert_eq!(
                resolver.resolve(&ctx, "main", "lodash").expect("resolve"),
                "sandbox-import:lodash"
            );
            assert_eq!(
                resolver.resolve(&ctx, "main", "./lib/util.js").expect("resolve"),
                "sandbox-import:./lib/util.js"
            );
            assert_eq!(
                resolver
                    .resolve(&ctx, "main", "sandbox-import:chai")
                    .expect("resolve"),
                "sandbox-import:chai"
            );
        });
    }
}
