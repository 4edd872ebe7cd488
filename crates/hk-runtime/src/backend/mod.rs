use std::rc::Rc;

use hk_core::{BackendKind, SandboxLimits, ScriptFault, ScriptPhase};

use crate::host::HostFunctionRegistry;

mod boa;
mod quickjs;

pub use boa::EmbeddedInterpreterBackend;
pub use quickjs::IsolatedVmBackend;

const PRELUDE: &str = include_str!("../js/prelude.js");
const START: &str = "__sandbox_start();";
const TICK: &str = "__sandbox_tick();";
pub(crate) const HOST_CALL_GLOBAL: &str = "__host_call";

/// What a backend evaluates for one run. The script body is not part of it:
/// the prelude fetches the body through `runtime.source` and compiles it as an
/// async function, so user text is never spliced into host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptEntry {
    pub phase: ScriptPhase,
    pub prelude: &'static str,
    pub start: &'static str,
    /// Fires the next due timer. Evaluates to `false` when none is left.
    pub tick: &'static str,
}

impl ScriptEntry {
    pub fn new(phase: ScriptPhase) -> Self {
        Self {
            phase,
            prelude: PRELUDE,
            start: START,
            tick: TICK,
        }
    }
}

/// A JavaScript engine able to host one script run.
///
/// Implementations install `__host_call` as the only host-provided global,
/// evaluate the prelude, start the script and drain the job queue until it is
/// empty. Then they evaluate the tick entry and drain again, until the tick
/// reports no timer left. Whether the script settled is read back from the
/// host afterwards.
pub trait ExecutionBackend {
    fn kind(&self) -> BackendKind;

    fn run(&self, entry: &ScriptEntry, host: Rc<dyn HostFunctionRegistry>)
        -> Result<(), ScriptFault>;
}

pub fn create_backend(kind: BackendKind, limits: &SandboxLimits) -> Box<dyn ExecutionBackend> {
    match kind {
        BackendKind::IsolatedVm => Box::new(IsolatedVmBackend::new(limits.clone())),
        BackendKind::EmbeddedInterpreter => Box::new(EmbeddedInterpreterBackend::new(limits.clone())),
    }
}

#[cfg(test)]
mod backend_tests {
    use std::cell::RefCell;

    use hk_core::HostCallError;
    use serde_json::{json, Value};

    use super::*;

    /// Minimal registry answering only what the prelude needs to boot.
    struct BootHost {
        source: String,
        settled: RefCell<Option<Value>>,
        emitted: RefCell<Vec<Value>>,
    }

    impl BootHost {
        fn new(source: &str) -> Rc<Self> {
            Rc::new(Self {
                source: source.to_string(),
                settled: RefCell::new(None),
                emitted: RefCell::new(Vec::new()),
            })
        }
    }

    impl HostFunctionRegistry for BootHost {
        fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, HostCallError> {
            match name {
                "runtime.info" => Ok(Some(json!({
                    "phase": "pre-request",
                    "hasResponse": false,
                    "hasRunRequest": false,
                    "collectionPath": "/tmp",
                    "collectionName": "boot"
                }))),
                "runtime.source" => Ok(Some(json!(self.source))),
                "runtime.settle" => {
                    *self.settled.borrow_mut() = args.first().cloned();
                    Ok(None)
                }
                "runtime.sleep" => Ok(None),
                "modules.preload" => Ok(Some(json!([{
                    "id": "chai",
                    "name": "chai",
                    "origin": "curated",
                    "natives": [],
                    "constants": {},
                    "dirname": "/tmp",
                    "source": "module.exports = { expect: function () {}, assert: function () {} };"
                }]))),
                "console.emit" => {
                    self.emitted.borrow_mut().push(json!(args));
                    Ok(None)
                }
                "modules.resolve" => Err(HostCallError::denied("module is not available")),
                other => Err(HostCallError::Unknown(other.to_string())),
            }
        }

        fn names(&self) -> &[&'static str] {
            &[]
        }
    }

    fn run_on(kind: BackendKind, source: &str) -> Rc<BootHost> {
        let host = BootHost::new(source);
        create_backend(kind, &SandboxLimits::default())
            .run(&ScriptEntry::new(ScriptPhase::PreRequest), host.clone())
            .expect("backend should run the prelude");
        host
    }

    #[test]
    fn both_backends_settle_a_trivial_script() {
        for kind in BackendKind::ALL {
            let host = run_on(kind, "console.log('hi', 1);");
            assert_eq!(*host.settled.borrow(), Some(json!({ "ok": true })), "{}", kind);
            assert_eq!(host.emitted.borrow().as_slice(), &[json!(["log", ["hi", 1]])]);
        }
    }

    #[test]
    fn both_backends_report_uncaught_errors_through_settle() {
        for kind in BackendKind::ALL {
            let host = run_on(kind, "throw new TypeError('nope');");
            assert_eq!(
                *host.settled.borrow(),
                Some(json!({ "ok": false, "name": "TypeError", "message": "nope" })),
                "{}",
                kind
            );
        }
    }

    #[test]
    fn awaited_promises_are_drained_before_run_returns() {
        for kind in BackendKind::ALL {
            let host = run_on(
                kind,
                "await Promise.resolve(1); await new Promise((resolve) => resolve()); console.log('done');",
            );
            assert_eq!(*host.settled.borrow(), Some(json!({ "ok": true })), "{}", kind);
            assert_eq!(host.emitted.borrow().len(), 1);
        }
    }

    #[test]
    fn host_call_global_is_removed_before_the_script_runs() {
        for kind in BackendKind::ALL {
            let host = run_on(kind, "console.log(typeof __host_call);");
            assert_eq!(
                host.emitted.borrow().as_slice(),
                &[json!(["log", ["undefined"]])],
                "{}",
                kind
            );
        }
    }

    #[test]
    fn factory_reports_requested_kind() {
        for kind in BackendKind::ALL {
            assert_eq!(create_backend(kind, &SandboxLimits::default()).kind(), kind);
        }
    }

    #[test]
    fn timers_fire_after_microtasks_in_due_order() {
        let script = "const order = [];\n\
                      setTimeout((tag) => order.push(tag), 20, 'late');\n\
                      setTimeout(() => order.push('early'), 1);\n\
                      clearTimeout(setTimeout(() => order.push('cancelled'), 0));\n\
                      Promise.resolve().then(() => order.push('microtask'));\n\
                      await new Promise((resolve) => setTimeout(resolve, 30));\n\
                      console.log(order.join(','));";
        for kind in BackendKind::ALL {
            let host = run_on(kind, script);
            assert_eq!(*host.settled.borrow(), Some(json!({ "ok": true })), "{}", kind);
            assert_eq!(
                host.emitted.borrow().as_slice(),
                &[json!(["log", ["microtask,early,late"]])],
                "{}",
                kind
            );
        }
    }
}
