use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type VariableMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableOrigin {
    Environment,
    Runtime,
    Collection,
    Folder,
    Request,
    GlobalEnvironment,
    Oauth2Credentials,
    ProcessEnv,
}

impl VariableOrigin {
    pub const ALL: [VariableOrigin; 8] = [
        Self::Environment,
        Self::Runtime,
        Self::Collection,
        Self::Folder,
        Self::Request,
        Self::GlobalEnvironment,
        Self::Oauth2Credentials,
        Self::ProcessEnv,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Runtime => "runtime",
            Self::Collection => "collection",
            Self::Folder => "folder",
            Self::Request => "request",
            Self::GlobalEnvironment => "globalEnvironment",
            Self::Oauth2Credentials => "oauth2Credentials",
            Self::ProcessEnv => "processEnv",
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Oauth2Credentials | Self::ProcessEnv)
    }
}

impl fmt::Display for VariableOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableOrigin {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|origin| origin.as_str() == value)
            .ok_or_else(|| format!("unknown variable origin \"{}\"", value))
    }
}

/// Independent variable stores visible to one script run. Precedence between
/// stores is decided by whoever picks the accessor, never by merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableSnapshot {
    pub environment: VariableMap,
    pub runtime: VariableMap,
    pub collection: VariableMap,
    pub folder: VariableMap,
    pub request: VariableMap,
    pub global_environment: VariableMap,
    pub oauth2_credentials: VariableMap,
    pub process_env: VariableMap,
}

impl VariableSnapshot {
    pub fn map(&self, origin: VariableOrigin) -> &VariableMap {
        match origin {
            VariableOrigin::Environment => &self.environment,
            VariableOrigin::Runtime => &self.runtime,
            VariableOrigin::Collection => &self.collection,
            VariableOrigin::Folder => &self.folder,
            VariableOrigin::Request => &self.request,
            VariableOrigin::GlobalEnvironment => &self.global_environment,
            VariableOrigin::Oauth2Credentials => &self.oauth2_credentials,
            VariableOrigin::ProcessEnv => &self.process_env,
        }
    }

    pub fn map_mut(&mut self, origin: VariableOrigin) -> &mut VariableMap {
        match origin {
            VariableOrigin::Environment => &mut self.environment,
            VariableOrigin::Runtime => &mut self.runtime,
            VariableOrigin::Collection => &mut self.collection,
            VariableOrigin::Folder => &mut self.folder,
            VariableOrigin::Request => &mut self.request,
            VariableOrigin::GlobalEnvironment => &mut self.global_environment,
            VariableOrigin::Oauth2Credentials => &mut self.oauth2_credentials,
            VariableOrigin::ProcessEnv => &mut self.process_env,
        }
    }
}

#[cfg(test)]
mod variables_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn origins_round_trip_through_their_names() {
        for origin in VariableOrigin::ALL {
            assert_eq!(origin.as_str().parse::<VariableOrigin>(), Ok(origin));
        }
        assert!("nope".parse::<VariableOrigin>().is_err());
    }

    #[test]
    fn only_process_env_and_oauth2_are_read_only() {
        let read_only = VariableOrigin::ALL
            .into_iter()
            .filter(|origin| origin.is_read_only())
            .collect::<Vec<_>>();
        assert_eq!(
            read_only,
            vec![VariableOrigin::Oauth2Credentials, VariableOrigin::ProcessEnv]
        );
    }

    #[test]
    fn snapshot_deserializes_with_missing_maps() {
        let snapshot: VariableSnapshot = serde_json::from_value(json!({
            "environment": { "host": "localhost" },
            "globalEnvironment": { "token": 1 }
        }))
        .expect("snapshot should parse");
        assert_eq!(
            snapshot.map(VariableOrigin::Environment).get("host"),
            Some(&json!("localhost"))
        );
        assert_eq!(
            snapshot.map(VariableOrigin::GlobalEnvironment).get("token"),
            Some(&json!(1))
        );
        assert!(snapshot.runtime.is_empty());
    }

    #[test]
    fn map_mut_targets_the_selected_origin_only() {
        let mut snapshot = VariableSnapshot::default();
        snapshot
            .map_mut(VariableOrigin::Folder)
            .insert("a".to_string(), json!(true));
        assert_eq!(snapshot.folder.len(), 1);
        assert!(snapshot.collection.is_empty());
    }
}
