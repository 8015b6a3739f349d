use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A service of the topology and the modes it can run in
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    pub modes: Vec<Mode>,
}

impl ServiceDefinition {
    /// Find a mode by name
    pub fn mode(&self, name: &str) -> Option<&Mode> {
        self.modes.iter().find(|m| m.name == name)
    }
}

/// A named, mutually exclusive configuration of a service
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Mode {
    pub name: String,
    /// `None` is the "off" state: nothing is spawned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencySpec>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

/// How to launch a service; every field is a template
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunSpec {
    pub command: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Cross-service references, `variable -> "service.setting"`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DependencySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<BTreeMap<String, String>>,
}
