use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::variables::VariableOrigin;

pub const CAPABILITY_DENIED_NAME: &str = "CapabilityDenied";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    Uncaught,
    CapabilityDenied,
    Engine,
}

impl FaultKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Uncaught => "SCRIPT_FAULT",
            Self::CapabilityDenied => "SCRIPT_CAPABILITY_DENIED",
            Self::Engine => "SCRIPT_ENGINE_FAULT",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A fault raised while a hook script was running. Carries the script-visible
/// error name and message verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct ScriptFault {
    pub kind: FaultKind,
    pub name: String,
    pub message: String,
}

impl ScriptFault {
    pub fn uncaught(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let kind = if name == CAPABILITY_DENIED_NAME {
            FaultKind::CapabilityDenied
        } else {
            FaultKind::Uncaught
        };
        Self {
            kind,
            name,
            message: message.into(),
        }
    }

    pub fn capability_denied(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::CapabilityDenied,
            name: CAPABILITY_DENIED_NAME.to_string(),
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Engine,
            name: "EngineFault".to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_capability_denied(&self) -> bool {
        self.kind == FaultKind::CapabilityDenied
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("{origin} variables are read-only")]
    ReadOnly { origin: VariableOrigin },
    #[error("Creating a variable without specifying a name is not allowed.")]
    MissingName,
    #[error(
        "Variable name: \"{name}\" contains invalid characters! Names must only contain alpha-numeric characters, \"-\", \"_\", \".\""
    )]
    InvalidName { name: String },
    #[error("deleteAll is only supported for runtime variables, not {origin}")]
    DeleteAllUnsupported { origin: VariableOrigin },
}

/// Failure of a host function invoked from inside the sandbox. The `name`
/// becomes the `name` of the error thrown into the script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostCallError {
    #[error("{0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
    #[error("host function \"{0}\" is not registered")]
    Unknown(String),
    #[error("invalid arguments for \"{function}\": {message}")]
    InvalidArguments { function: String, message: String },
}

impl HostCallError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::Denied(message.into())
    }

    pub fn invalid(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn error_name(&self) -> &'static str {
        match self {
            Self::Denied(_) => CAPABILITY_DENIED_NAME,
            Self::Unknown(_) => "ReferenceError",
            Self::InvalidArguments { .. } => "TypeError",
            Self::Failed(_) => "Error",
        }
    }
}

impl From<ScopeError> for HostCallError {
    fn from(error: ScopeError) -> Self {
        Self::Failed(error.to_string())
    }
}
