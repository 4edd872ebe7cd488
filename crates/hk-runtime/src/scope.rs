use std::cell::RefCell;
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use hk_core::{ControlSignals, ScopeError, VariableOrigin, VariableSnapshot};
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Default)]
struct ScopeState {
    snapshot: VariableSnapshot,
    control: ControlSignals,
}

/// Per-run view over the variable stores and control signals. Clones share the
/// same state, so the host bridge and the orchestrator see the same mutations.
#[derive(Debug, Clone)]
pub struct ScopeFacade {
    state: Rc<RefCell<ScopeState>>,
    collection_path: PathBuf,
    collection_name: String,
}

fn variable_name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[\w.-]+$").expect("variable name regex should compile"))
}

pub fn validate_variable_name(name: &str) -> Result<(), ScopeError> {
    if name.is_empty() {
        return Err(ScopeError::MissingName);
    }
    if !variable_name_regex().is_match(name) {
        return Err(ScopeError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl ScopeFacade {
    pub fn new(
        snapshot: VariableSnapshot,
        collection_path: impl Into<PathBuf>,
        collection_name: impl Into<String>,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(ScopeState {
                snapshot,
                control: ControlSignals::default(),
            })),
            collection_path: collection_path.into(),
            collection_name: collection_name.into(),
        }
    }

    pub fn get(&self, origin: VariableOrigin, name: &str) -> Option<Value> {
        self.state.borrow().snapshot.map(origin).get(name).cloned()
    }

    pub fn has(&self, origin: VariableOrigin, name: &str) -> bool {
        self.state.borrow().snapshot.map(origin).contains_key(name)
    }

    pub fn set(&self, origin: VariableOrigin, name: &str, value: Value) -> Result<(), ScopeError> {
        if origin.is_read_only() {
            return Err(ScopeError::ReadOnly { origin });
        }
        validate_variable_name(name)?;
        self.state
            .borrow_mut()
            .snapshot
            .map_mut(origin)
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn delete(&self, origin: VariableOrigin, name: &str) -> Result<bool, ScopeError> {
        if origin.is_read_only() {
            return Err(ScopeError::ReadOnly { origin });
        }
        Ok(self
            .state
            .borrow_mut()
            .snapshot
            .map_mut(origin)
            .remove(name)
            .is_some())
    }

    pub fn delete_all(&self, origin: VariableOrigin) -> Result<(), ScopeError> {
        if origin != VariableOrigin::Runtime {
            return Err(ScopeError::DeleteAllUnsupported { origin });
        }
        self.state.borrow_mut().snapshot.map_mut(origin).clear();
        Ok(())
    }

    pub fn set_next_request(&self, name: Option<String>) {
        self.state.borrow_mut().control.next_request_name = name;
    }

    pub fn skip_request(&self) {
        self.state.borrow_mut().control.skip_request = true;
    }

    pub fn stop_execution(&self) {
        self.state.borrow_mut().control.stop_execution = true;
    }

    pub fn control(&self) -> ControlSignals {
        self.state.borrow().control.clone()
    }

    pub fn cwd(&self) -> &Path {
        &self.collection_path
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Moves the mutated snapshot and signals out, leaving empty state behind.
    pub fn take(&self) -> (VariableSnapshot, ControlSignals) {
        let mut state = self.state.borrow_mut();
        (
            mem::take(&mut state.snapshot),
            mem::take(&mut state.control),
        )
    }
}

#[cfg(test)]
mod scope_tests {
    use super::*;
    use serde_json::json;

    fn facade() -> ScopeFacade {
        let mut snapshot = VariableSnapshot::default();
        snapshot
            .environment
            .insert("host".to_string(), json!("localhost"));
        snapshot.process_env.insert("HOME".to_string(), json!("/root"));
        ScopeFacade::new(snapshot, "/tmp/collection", "demo")
    }

    #[test]
    fn reads_and_writes_stay_in_their_origin() {
        let scope = facade();
        assert_eq!(
            scope.get(VariableOrigin::Environment, "host"),
            Some(json!("localhost"))
        );
        assert_eq!(scope.get(VariableOrigin::Runtime, "host"), None);
        scope
            .set(VariableOrigin::Runtime, "token", json!("abc"))
            .expect("runtime write should succeed");
        assert!(scope.has(VariableOrigin::Runtime, "token"));
        assert!(!scope.has(VariableOrigin::Collection, "token"));
        assert_eq!(scope.delete(VariableOrigin::Runtime, "token"), Ok(true));
        assert_eq!(scope.delete(VariableOrigin::Runtime, "token"), Ok(false));
    }

    #[test]
    fn read_only_origins_reject_writes() {
        let scope = facade();
        let error = scope
            .set(VariableOrigin::ProcessEnv, "HOME", json!("/tmp"))
            .expect_err("process env should be read-only");
        assert_eq!(
            error,
            ScopeError::ReadOnly {
                origin: VariableOrigin::ProcessEnv
            }
        );
        assert!(scope.delete(VariableOrigin::Oauth2Credentials, "x").is_err());
        assert_eq!(
            scope.get(VariableOrigin::ProcessEnv, "HOME"),
            Some(json!("/root"))
        );
    }

    #[test]
    fn variable_names_are_validated() {
        let scope = facade();
        assert_eq!(
            scope.set(VariableOrigin::Runtime, "", json!(1)),
            Err(ScopeError::MissingName)
        );
        assert!(matches!(
            scope.set(VariableOrigin::Runtime, "bad name", json!(1)),
            Err(ScopeError::InvalidName { .. })
        ));
        scope
            .set(VariableOrigin::Runtime, "user.id-2_x", json!(1))
            .expect("dotted names are allowed");
    }

    #[test]
    fn delete_all_only_clears_runtime_variables() {
        let scope = facade();
        scope
            .set(VariableOrigin::Runtime, "a", json!(1))
            .expect("write should succeed");
        scope.delete_all(VariableOrigin::Runtime).expect("clear runtime");
        assert!(!scope.has(VariableOrigin::Runtime, "a"));
        assert!(matches!(
            scope.delete_all(VariableOrigin::Environment),
            Err(ScopeError::DeleteAllUnsupported { .. })
        ));
    }

    #[test]
    fn control_signals_and_take_move_state_out() {
        let scope = facade();
        scope.set_next_request(Some("first".to_string()));
        scope.set_next_request(Some("second".to_string()));
        scope.skip_request();
        scope.skip_request();
        let shared = scope.clone();
        shared
            .set(VariableOrigin::Collection, "shared", json!(true))
            .expect("write through clone");
        assert_eq!(scope.cwd(), Path::new("/tmp/collection"));
        assert_eq!(scope.collection_name(), "demo");

        let (snapshot, control) = scope.take();
        assert_eq!(control.next_request_name.as_deref(), Some("second"));
        assert!(control.skip_request);
        assert!(!control.stop_execution);
        assert_eq!(snapshot.collection.get("shared"), Some(&json!(true)));
        assert!(scope.get(VariableOrigin::Environment, "host").is_none());
    }
}
