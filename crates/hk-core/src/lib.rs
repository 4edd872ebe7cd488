pub mod error;
pub mod types;
pub mod variables;

pub use error::{FaultKind, HostCallError, ScopeError, ScriptFault};
pub use types::*;
pub use variables::*;
