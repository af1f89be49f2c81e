//! Hub messages received from the server and invocations sent to it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hub method invocation pushed by the server.
///
/// Equality is structural on hub, method and arguments; nested objects and
/// arrays compare by content. The state map does not take part.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "H", alias = "Hub", default)]
    hub: String,
    #[serde(rename = "M", alias = "Method", default)]
    method: String,
    #[serde(rename = "A", alias = "Args", default)]
    args: Vec<Value>,
    #[serde(rename = "S", alias = "State", default)]
    state: Map<String, Value>,
}

impl HubMessage {
    pub fn new(hub: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            hub: hub.into(),
            method: method.into(),
            args,
            state: Map::new(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: Map<String, Value>) -> Self {
        self.state = state;
        self
    }

    /// Decode one element of a frame's message batch.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Hub that sent this message.
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Client method to invoke.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Deserialize argument `index` into `T`.
    pub fn arg<T: serde::de::DeserializeOwned>(&self, index: usize) -> Option<serde_json::Result<T>> {
        self.args
            .get(index)
            .map(|value| T::deserialize(value))
    }
}

impl PartialEq for HubMessage {
    fn eq(&self, other: &Self) -> bool {
        self.hub == other.hub && self.method == other.method && self.args == other.args
    }
}

impl fmt::Display for HubMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.method, self.hub)
    }
}

/// Field-name scheme used to encode invocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldNames {
    /// `hub`, `method`, `args`, `state`, `id` (protocol 1.0 and 1.1).
    Long,
    /// `H`, `M`, `A`, `S`, `I` (everything newer).
    Short,
}

/// An outbound hub method invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub hub: String,
    pub method: String,
    pub args: Vec<Value>,
    pub state: Option<Map<String, Value>>,
    pub id: u64,
}

#[derive(Serialize)]
struct LongInvocation<'a> {
    hub: &'a str,
    method: &'a str,
    args: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a Map<String, Value>>,
    id: u64,
}

#[derive(Serialize)]
struct ShortInvocation<'a> {
    #[serde(rename = "H")]
    hub: &'a str,
    #[serde(rename = "M")]
    method: &'a str,
    #[serde(rename = "A")]
    args: &'a [Value],
    #[serde(rename = "S", skip_serializing_if = "Option::is_none")]
    state: Option<&'a Map<String, Value>>,
    #[serde(rename = "I")]
    id: u64,
}

impl Invocation {
    /// Encode as the JSON carried in the `data` form field.
    pub fn encode(&self, names: FieldNames) -> serde_json::Result<String> {
        match names {
            FieldNames::Long => serde_json::to_string(&LongInvocation {
                hub: &self.hub,
                method: &self.method,
                args: &self.args,
                state: self.state.as_ref(),
                id: self.id,
            }),
            FieldNames::Short => serde_json::to_string(&ShortInvocation {
                hub: &self.hub,
                method: &self.method,
                args: &self.args,
                state: self.state.as_ref(),
                id: self.id,
            }),
        }
    }
}
