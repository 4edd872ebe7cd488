mod case;
mod runner;
mod source;

pub use case::{
    ExpectedFault, ExpectedOutput, Expectation, TestCase, CASE_FILE, SCRIPT_FILE,
    TESTCASE_SCHEMA_V1,
};
pub use runner::{assert_case, assert_case_dir, run_case, BackendReport, RunReport};
pub use source::{bundled_cases_root, discover_cases, read_case_script, read_test_case};

use std::path::PathBuf;

use hk_core::BackendKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse testcase {path}: {source}")]
    ParseCase {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid testcase schema version \"{found}\", expected \"{expected}\".")]
    InvalidSchemaVersion { expected: String, found: String },
    #[error("Script file {path} is empty.")]
    ScriptEmpty { path: PathBuf },
    #[error("No case directories under {path}.")]
    SourceEmpty { path: PathBuf },
    #[error("Testcase lists no backends.")]
    NoBackends,
    #[error("[{backend}] unexpected fault: {fault}")]
    UnexpectedFault { backend: BackendKind, fault: String },
    #[error("[{backend}] expected a fault, script finished. observed={observed}")]
    UnexpectedSuccess {
        backend: BackendKind,
        observed: String,
    },
    #[error("[{backend}] {field} mismatch. expected={expected} actual={actual}")]
    FieldMismatch {
        backend: BackendKind,
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("Backends diverge: {first}={left} {second}={right}")]
    BackendDivergence {
        first: BackendKind,
        second: BackendKind,
        left: String,
        right: String,
    },
    #[error("Failed to serialize outcome for diff: {0}")]
    Serialize(serde_json::Error),
}
