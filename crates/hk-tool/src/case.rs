use hk_core::{
    BackendKind, ControlSignals, FaultKind, RequestDescriptor, ResponseDescriptor, SandboxLimits,
    ScriptPhase, ScriptingConfig, TestResult, VariableSnapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TESTCASE_SCHEMA_V1: &str = "hk-tool-case.v1";
pub const CASE_FILE: &str = "case.json";
pub const SCRIPT_FILE: &str = "script.js";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub schema_version: String,
    #[serde(default = "default_phase")]
    pub phase: ScriptPhase,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendKind>,
    #[serde(default)]
    pub request: RequestDescriptor,
    #[serde(default)]
    pub response: Option<ResponseDescriptor>,
    #[serde(default)]
    pub variables: VariableSnapshot,
    #[serde(default)]
    pub prior_results: Vec<TestResult>,
    #[serde(default)]
    pub config: ScriptingConfig,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default)]
    pub limits: Option<SandboxLimits>,
    pub expected: Expectation,
}

fn default_phase() -> ScriptPhase {
    ScriptPhase::PreRequest
}

fn default_backends() -> Vec<BackendKind> {
    BackendKind::ALL.to_vec()
}

fn default_collection_name() -> String {
    "fixtures".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Expectation {
    Output(ExpectedOutput),
    Fault(ExpectedFault),
}

/// Fields left out are not compared. `variables` and `request` match when
/// every key they list is present with an equal value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpectedOutput {
    pub variables: Option<Value>,
    pub request: Option<Value>,
    pub test_results: Option<Vec<TestResult>>,
    pub control: Option<ControlSignals>,
    pub console: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedFault {
    pub fault_kind: FaultKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod case_tests {
    use super::*;
    use hk_core::TestStatus;

    #[test]
    fn defaults_cover_both_backends_before_the_request() {
        assert_eq!(default_phase(), ScriptPhase::PreRequest);
        assert_eq!(
            default_backends(),
            vec![BackendKind::IsolatedVm, BackendKind::EmbeddedInterpreter]
        );
        assert_eq!(default_collection_name(), "fixtures");
    }

    #[test]
    fn testcase_deserialize_applies_defaults() {
        let parsed: TestCase = serde_json::from_str(
            r#"{
  "schemaVersion":"hk-tool-case.v1",
  "expected":{"kind":"output"}
}"#,
        )
        .expect("testcase should parse");

        assert_eq!(parsed.phase, ScriptPhase::PreRequest);
        assert_eq!(parsed.backends.len(), 2);
        assert_eq!(parsed.request, RequestDescriptor::default());
        assert!(parsed.response.is_none());
        assert!(parsed.limits.is_none());
        assert_eq!(parsed.expected, Expectation::Output(ExpectedOutput::default()));
    }

    #[test]
    fn testcase_deserialize_reads_full_shape() {
        let parsed: TestCase = serde_json::from_str(
            r#"{
  "schemaVersion":"hk-tool-case.v1",
  "phase":"postResponse",
  "backends":["embedded-interpreter"],
  "request":{"method":"POST","url":"https://api.test/items"},
  "response":{"status":201,"statusText":"Created","body":{"id":7}},
  "variables":{"environment":{"host":"api.test"}},
  "priorResults":[{"description":"earlier","status":"pass"}],
  "config":{"moduleWhitelist":["left-pad"]},
  "collectionName":"shop",
  "limits":{"loopIterationLimit":1000},
  "expected":{
    "kind":"output",
    "variables":{"runtime":{"id":7}},
    "testResults":[{"description":"earlier","status":"pass"}],
    "control":{"skipRequest":true},
    "console":["saved 7"]
  }
}"#,
        )
        .expect("testcase should parse");

        assert_eq!(parsed.phase, ScriptPhase::PostResponse);
        assert_eq!(parsed.backends, vec![BackendKind::EmbeddedInterpreter]);
        assert_eq!(parsed.request.method, "POST");
        assert_eq!(parsed.response.as_ref().map(|r| r.status), Some(201));
        assert_eq!(parsed.variables.environment["host"], "api.test");
        assert_eq!(parsed.prior_results[0].status, TestStatus::Pass);
        assert_eq!(parsed.config.module_whitelist, vec!["left-pad".to_string()]);
        assert_eq!(parsed.collection_name, "shop");
        let limits = parsed.limits.expect("limits should parse");
        assert_eq!(limits.loop_iteration_limit, 1000);
        assert_eq!(limits.recursion_limit, SandboxLimits::default().recursion_limit);

        let Expectation::Output(expected) = parsed.expected else {
            panic!("expected output expectation");
        };
        assert!(expected.request.is_none());
        assert_eq!(expected.control.map(|c| c.skip_request), Some(true));
        assert_eq!(expected.console, Some(vec!["saved 7".to_string()]));
    }

    #[test]
    fn fault_expectation_parses_kind_and_optional_fields() {
        let parsed: Expectation = serde_json::from_str(
            r#"{"kind":"fault","faultKind":"capabilityDenied","message":"nope"}"#,
        )
        .expect("fault expectation should parse");
        assert_eq!(
            parsed,
            Expectation::Fault(ExpectedFault {
                fault_kind: FaultKind::CapabilityDenied,
                name: None,
                message: Some("nope".to_string()),
            })
        );
    }

    #[test]
    fn missing_expectation_is_rejected() {
        let error = serde_json::from_str::<TestCase>(r#"{"schemaVersion":"hk-tool-case.v1"}"#)
            .expect_err("expected is required");
        assert!(error.to_string().contains("expected"));
    }
}
