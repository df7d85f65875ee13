//! Method catalog and dashboard events

use crate::correlation::{Command, PendingCommand};
use beacon_proto::operations;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One argument of a remote method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodParameter {
    /// Argument name
    pub name: String,
    /// Type hint: `bool`, `int`, `str`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Default value, `null` when there is none
    #[serde(default)]
    pub default: Value,
}

impl MethodParameter {
    /// Create a parameter without a default
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            default: Value::Null,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Value used to pre-populate the argument form
    pub fn initial_value(&self) -> Value {
        if !self.default.is_null() {
            return self.default.clone();
        }
        match self.kind.as_str() {
            "bool" => Value::Bool(false),
            "int" => Value::from(0),
            _ => Value::String(String::new()),
        }
    }
}

/// Description of a remote method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodDefinition {
    /// Arguments in display order
    #[serde(default)]
    pub parameters: Vec<MethodParameter>,
}

impl MethodDefinition {
    /// Create a definition from its parameters
    pub fn new(parameters: Vec<MethodParameter>) -> Self {
        Self { parameters }
    }
}

/// Methods offered to the operator, by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodCatalog {
    methods: BTreeMap<String, MethodDefinition>,
}

impl MethodCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the operations every agent understands
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(operations::EVAL_JS, MethodDefinition::new(vec![MethodParameter::new("code", "str")]));
        catalog.register(operations::LOAD_PLUGIN, MethodDefinition::new(vec![MethodParameter::new("url", "str")]));
        catalog
    }

    /// Add or replace a method
    pub fn register(&mut self, name: impl Into<String>, definition: MethodDefinition) {
        self.methods.insert(name.into(), definition);
    }

    /// Look up a method
    pub fn get(&self, name: &str) -> Option<&MethodDefinition> {
        self.methods.get(name)
    }

    /// Method names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Arguments pre-populated from defaults, falling back per type
    pub fn default_args(&self, name: &str) -> Option<Map<String, Value>> {
        self.methods.get(name).map(|definition| {
            definition
                .parameters
                .iter()
                .map(|parameter| (parameter.name.clone(), parameter.initial_value()))
                .collect()
        })
    }
}

/// Payload of a `plugin.response` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Response content
    pub msg: Value,
    /// Correlation id of the command being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<&PendingCommand> for PluginResponse {
    fn from(command: &PendingCommand) -> Self {
        Self {
            msg: command.result.clone().unwrap_or(Value::Null),
            id: Some(command.id.clone()),
        }
    }
}

/// Events pushed to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DashboardEvent {
    /// Connected agent ids
    #[serde(rename = "clients.response")]
    Clients(Vec<String>),
    /// Available methods
    #[serde(rename = "methods.response")]
    Methods(MethodCatalog),
    /// A command result
    #[serde(rename = "plugin.response")]
    Plugin(PluginResponse),
    /// A command that could not be delivered
    #[serde(rename = "plugin.error")]
    PluginError {
        /// Correlation id
        id: String,
        /// Failure description
        error: String,
    },
}

/// Requests sent by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DashboardRequest {
    /// Ask for [`DashboardEvent::Clients`]
    #[serde(rename = "clients.request")]
    Clients,
    /// Ask for [`DashboardEvent::Methods`]
    #[serde(rename = "methods.request")]
    Methods,
    /// Run a method on an agent; answered with the command id
    #[serde(rename = "plugin.run")]
    Run(Command),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CommandStatus;
    use serde_json::json;

    fn catalog() -> MethodCatalog {
        let mut catalog = MethodCatalog::builtin();
        catalog.register(
            "website.render",
            MethodDefinition::new(vec![
                MethodParameter::new("url", "str"),
                MethodParameter::new("bundle", "bool"),
                MethodParameter::new("depth", "int"),
                MethodParameter::new("delay", "int").with_default(5),
            ]),
        );
        catalog
    }

    #[test]
    fn test_default_args_fall_back_per_type() {
        let args = catalog().default_args("website.render").unwrap();
        assert_eq!(Value::Object(args), json!({"url": "", "bundle": false, "depth": 0, "delay": 5}));
    }

    #[test]
    fn test_default_args_unknown_method() {
        assert!(catalog().default_args("nope").is_none());
    }

    #[test]
    fn test_builtin_methods() {
        let catalog = MethodCatalog::builtin();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["eval_js", "load_plugin"]);
        assert_eq!(Value::Object(catalog.default_args("eval_js").unwrap()), json!({"code": ""}));
    }

    #[test]
    fn test_catalog_deserializes_from_method_map() {
        let catalog: MethodCatalog = serde_json::from_value(json!({
            "eval_js": {"parameters": [{"name": "code", "type": "str", "default": "1+1"}]}
        }))
        .unwrap();
        assert_eq!(Value::Object(catalog.default_args("eval_js").unwrap()), json!({"code": "1+1"}));
    }

    #[test]
    fn test_event_wire_shapes() {
        let clients = serde_json::to_value(DashboardEvent::Clients(vec!["a".into()])).unwrap();
        assert_eq!(clients, json!({"event": "clients.response", "data": ["a"]}));

        let methods = serde_json::to_value(DashboardEvent::Methods(MethodCatalog::builtin())).unwrap();
        assert_eq!(methods["event"], "methods.response");
        assert_eq!(methods["data"]["load_plugin"]["parameters"][0]["type"], "str");

        let pending = PendingCommand {
            id: "x1".into(),
            result: Some(json!({"result": 2})),
            status: CommandStatus::Success,
            timestamp: 1,
        };
        let plugin = serde_json::to_value(DashboardEvent::Plugin(PluginResponse::from(&pending))).unwrap();
        assert_eq!(plugin, json!({"event": "plugin.response", "data": {"msg": {"result": 2}, "id": "x1"}}));
    }

    #[test]
    fn test_requests_parse() {
        let run: DashboardRequest = serde_json::from_value(json!({
            "event": "plugin.run",
            "data": {"client_id": "c1", "operation": "eval_js", "kwargs": {"code": "1"}}
        }))
        .unwrap();
        assert_eq!(run, DashboardRequest::Run(Command::new("c1", "eval_js").with_arg("code", "1")));

        let clients: DashboardRequest = serde_json::from_value(json!({"event": "clients.request"})).unwrap();
        assert_eq!(clients, DashboardRequest::Clients);
    }
}
