use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variables::VariableSnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemAccess {
    pub allow: bool,
}

/// Collection-level scripting settings, in the shape collections store them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptingConfig {
    pub filesystem_access: FilesystemAccess,
    pub module_whitelist: Vec<String>,
    pub additional_context_roots: Vec<PathBuf>,
}

impl ScriptingConfig {
    pub fn filesystem_access_allowed(&self) -> bool {
        self.filesystem_access.allow
    }

    pub fn allow_filesystem(mut self, allow: bool) -> Self {
        self.filesystem_access.allow = allow;
        self
    }

    pub fn whitelist<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_whitelist
            .extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn context_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.additional_context_roots
            .extend(roots.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlSignals {
    pub next_request_name: Option<String>,
    pub skip_request: bool,
    pub stop_execution: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub description: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn pass(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: TestStatus::Pass,
            error: None,
        }
    }

    pub fn fail(description: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: TestStatus::Fail,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDescriptor {
    pub name: Option<String>,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub timeout: Option<u64>,
    pub max_redirects: Option<u32>,
    pub auth_mode: String,
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self {
            name: None,
            method: "GET".to_string(),
            url: String::new(),
            headers: BTreeMap::new(),
            body: Value::Null,
            timeout: None,
            max_redirects: None,
            auth_mode: "none".to_string(),
        }
    }
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub response_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptPhase {
    PreRequest,
    PostResponse,
}

impl ScriptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreRequest => "pre-request",
            Self::PostResponse => "post-response",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "isolated-vm")]
    IsolatedVm,
    #[serde(rename = "embedded-interpreter")]
    EmbeddedInterpreter,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [Self::IsolatedVm, Self::EmbeddedInterpreter];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsolatedVm => "isolated-vm",
            Self::EmbeddedInterpreter => "embedded-interpreter",
        }
    }

    /// Whether `require` may resolve names and files on demand, as opposed to
    /// only seeing what was injected before the run.
    pub fn resolves_modules(self) -> bool {
        matches!(self, Self::IsolatedVm)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown backend \"{}\"", value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxLimits {
    pub memory_limit_bytes: usize,
    pub max_stack_size_bytes: usize,
    /// The embedded interpreter counts iterations of each loop. The isolated
    /// VM counts backward jumps and calls across the whole run, checked in
    /// steps of ten thousand, so its cut-off is approximate.
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            max_stack_size_bytes: 1024 * 1024,
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl FromStr for ConsoleLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "log" => Ok(Self::Log),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown console level \"{}\"", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunOutput {
    pub request: RequestDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDescriptor>,
    pub variables: VariableSnapshot,
    pub test_results: Vec<TestResult>,
    pub control: ControlSignals,
}
