//! Discrete commands exchanged between the subsystems and control commands
//! addressed to adapters or pipeline stages.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// Result parameters returned by a control command.
pub type CommandReply = BTreeMap<String, String>;

/// An identifier plus named string parameters.
///
/// Equality and hashing consider the identifier and parameters only; the
/// optional origin time is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    id: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<SimTime>,
}

impl Command {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: BTreeMap::new(),
            origin: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_origin(mut self, origin: SimTime) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn origin(&self) -> Option<SimTime> {
        self.origin
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.params == other.params
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.params.hash(state);
    }
}

/// Advertises one control command an adapter or stage understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommandInfo {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl ControlCommandInfo {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }
}
