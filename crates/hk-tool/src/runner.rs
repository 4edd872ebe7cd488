use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use hk_api::run_script;
use hk_core::{BackendKind, ConsoleLevel, ScriptFault, ScriptRunOutput};
use hk_runtime::{ConsoleSink, ScriptRunInput};
use serde::Serialize;
use serde_json::{json, Value};

use crate::source::{read_case_script, read_test_case};
use crate::{Expectation, ExpectedFault, ExpectedOutput, TestCase, ToolError, CASE_FILE};

#[derive(Debug, Clone, PartialEq)]
pub struct BackendReport {
    pub backend: BackendKind,
    pub outcome: Result<ScriptRunOutput, ScriptFault>,
    pub console: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub backends: Vec<BackendReport>,
}

/// Collects console lines as the space-joined rendering of their arguments.
#[derive(Default)]
struct ConsoleCapture {
    lines: RefCell<Vec<String>>,
}

impl ConsoleCapture {
    fn take(&self) -> Vec<String> {
        self.lines.take()
    }
}

impl ConsoleSink for ConsoleCapture {
    fn emit(&self, _level: ConsoleLevel, args: &[Value]) {
        let line = args
            .iter()
            .map(|arg| match arg {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.lines.borrow_mut().push(line);
    }
}

pub fn run_case(case_dir: &Path, case: &TestCase) -> Result<RunReport, ToolError> {
    if case.backends.is_empty() {
        return Err(ToolError::NoBackends);
    }
    let script = read_case_script(case_dir)?;
    let limits = case.limits.clone().unwrap_or_default();

    let backends = case
        .backends
        .iter()
        .map(|&backend| {
            let capture = Rc::new(ConsoleCapture::default());
            let console: Rc<dyn ConsoleSink> = capture.clone();
            let input = ScriptRunInput {
                script: script.clone(),
                request: case.request.clone(),
                response: case.response.clone(),
                variables: case.variables.clone(),
                prior_results: case.prior_results.clone(),
                config: case.config.clone(),
                collection_path: case_dir.to_path_buf(),
                collection_name: case.collection_name.clone(),
                backend,
                console: Some(console),
                ..ScriptRunInput::default()
            };
            let outcome = run_script(case.phase, input, &limits);
            BackendReport {
                backend,
                outcome,
                console: capture.take(),
            }
        })
        .collect();

    Ok(RunReport { backends })
}

pub fn assert_case(case_dir: &Path, case_path: &Path) -> Result<RunReport, ToolError> {
    let case = read_test_case(case_path)?;
    let report = run_case(case_dir, &case)?;

    for backend in &report.backends {
        match &case.expected {
            Expectation::Output(expected) => check_output(backend, expected)?,
            Expectation::Fault(expected) => check_fault(backend, expected)?,
        }
    }
    check_equivalence(&report)?;

    Ok(report)
}

/// [`assert_case`] with the case file in its default place.
pub fn assert_case_dir(case_dir: &Path) -> Result<RunReport, ToolError> {
    assert_case(case_dir, &case_dir.join(CASE_FILE))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::Serialize)
}

fn to_text<T: Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string(value).map_err(ToolError::Serialize)
}

/// Every key `expected` lists is present in `actual` with a matching value.
fn contains(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|found| contains(value, found))),
        _ => expected == actual,
    }
}

fn mismatch<T: Serialize, U: Serialize>(
    backend: BackendKind,
    field: &'static str,
    expected: &T,
    actual: &U,
) -> Result<(), ToolError> {
    Err(ToolError::FieldMismatch {
        backend,
        field,
        expected: to_text(expected)?,
        actual: to_text(actual)?,
    })
}

fn check_output(report: &BackendReport, expected: &ExpectedOutput) -> Result<(), ToolError> {
    let backend = report.backend;
    let output = match &report.outcome {
        Ok(output) => output,
        Err(fault) => {
            return Err(ToolError::UnexpectedFault {
                backend,
                fault: fault.to_string(),
            })
        }
    };

    if let Some(variables) = &expected.variables {
        let actual = to_json(&output.variables)?;
        if !contains(variables, &actual) {
            return mismatch(backend, "variables", variables, &actual);
        }
    }
    if let Some(request) = &expected.request {
        let actual = to_json(&output.request)?;
        if !contains(request, &actual) {
            return mismatch(backend, "request", request, &actual);
        }
    }
    if let Some(tests) = &expected.test_results {
        if tests != &output.test_results {
            return mismatch(backend, "testResults", tests, &output.test_results);
        }
    }
    if let Some(control) = &expected.control {
        if control != &output.control {
            return mismatch(backend, "control", control, &output.control);
        }
    }
    if let Some(console) = &expected.console {
        if console != &report.console {
            return mismatch(backend, "console", console, &report.console);
        }
    }
    Ok(())
}

fn check_fault(report: &BackendReport, expected: &ExpectedFault) -> Result<(), ToolError> {
    let backend = report.backend;
    let fault = match &report.outcome {
        Ok(output) => {
            return Err(ToolError::UnexpectedSuccess {
                backend,
                observed: to_text(output)?,
            })
        }
        Err(fault) => fault,
    };

    if fault.kind != expected.fault_kind {
        return mismatch(backend, "faultKind", &expected.fault_kind, &fault.kind);
    }
    if let Some(name) = &expected.name {
        if name != &fault.name {
            return mismatch(backend, "name", name, &fault.name);
        }
    }
    if let Some(message) = &expected.message {
        if message != &fault.message {
            return mismatch(backend, "message", message, &fault.message);
        }
    }
    Ok(())
}

fn observed(report: &BackendReport) -> Result<Value, ToolError> {
    let outcome = match &report.outcome {
        Ok(output) => json!({ "output": to_json(output)? }),
        Err(fault) => json!({ "fault": to_json(fault)? }),
    };
    Ok(json!({ "outcome": outcome, "console": report.console }))
}

fn check_equivalence(report: &RunReport) -> Result<(), ToolError> {
    let Some((first, rest)) = report.backends.split_first() else {
        return Ok(());
    };
    let left = observed(first)?;
    for other in rest {
        let right = observed(other)?;
        if left != right {
            return Err(ToolError::BackendDivergence {
                first: first.backend,
                second: other.backend,
                left: left.to_string(),
                right: right.to_string(),
            });
        }
    }
    Ok(())
}
