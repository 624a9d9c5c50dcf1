//! Function tools invoked synchronously by the provider during a stream.
//!
//! Tools form a static table of `{name, parameters schema, handler}` entries;
//! enablement is a set-membership check so the derived tool list for a tenant
//! is deterministic.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod navigate;

pub use navigate::NavigateWebTool;

/// Static description of a tool, including its JSON-schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The result returned after a tool runs.  `output` is sent back to the
/// provider verbatim; errors are reported as `{"error": "..."}` objects so a
/// failing tool never aborts the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: Value,
}

impl ToolOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, output: json!({ "error": message.into() }) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &Value) -> Result<ToolOutput>;
}

/// Registry of available tools plus the enabled subset.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    enabled: HashSet<String>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.enabled.insert(tool.spec().name);
        self.tools.push(tool);
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if enabled {
            self.enabled.insert(name.to_string());
        } else {
            self.enabled.remove(name);
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }

    /// Specs of enabled tools, in registration order.
    pub fn enabled_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| t.spec())
            .filter(|spec| self.enabled.contains(&spec.name))
            .collect()
    }

    /// Execute an enabled tool.  Disabled or unknown tools and handler
    /// failures all come back as error outputs, never as `Err`.
    pub async fn execute(&self, name: &str, args: &Value) -> ToolOutput {
        if !self.is_enabled(name) {
            return ToolOutput::error("disabled");
        }
        let Some(tool) = self.get(name) else {
            return ToolOutput::error(format!("unknown tool: {name}"));
        };
        match tool.run(args).await {
            Ok(output) => output,
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}

/// Render specs as provider function-tool entries.
pub fn to_function_tools(specs: &[ToolSpec]) -> Vec<Value> {
    specs
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "name": spec.name,
                "description": spec.description,
                "parameters": spec.parameters,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool {
        name: String,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("dummy: {}", self.name),
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }
        async fn run(&self, _args: &Value) -> Result<ToolOutput> {
            Ok(ToolOutput { success: true, output: json!({ "ran": self.name }) })
        }
    }

    #[test]
    fn registration_enables_by_default() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool { name: "alpha".into() }));
        assert!(registry.is_enabled("alpha"));
        assert_eq!(registry.enabled_specs().len(), 1);
    }

    #[test]
    fn disable_removes_from_specs_but_not_table() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool { name: "alpha".into() }));
        registry.set_enabled("alpha", false);
        assert!(registry.enabled_specs().is_empty());
        assert!(registry.get("alpha").is_some());
    }

    #[tokio::test]
    async fn execute_disabled_tool_reports_error_object() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool { name: "alpha".into() }));
        registry.set_enabled("alpha", false);

        let output = registry.execute("alpha", &json!({})).await;
        assert!(!output.success);
        assert_eq!(output.output["error"], "disabled");
    }

    #[tokio::test]
    async fn execute_unknown_tool_reports_error_object() {
        let registry = ToolRegistry::default();
        let output = registry.execute("nadie", &json!({})).await;
        assert!(!output.success);
    }

    #[tokio::test]
    async fn execute_runs_registered_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool { name: "alpha".into() }));
        let output = registry.execute("alpha", &json!({})).await;
        assert!(output.success);
        assert_eq!(output.output["ran"], "alpha");
    }

    #[test]
    fn function_tool_rendering() {
        let specs = vec![ToolSpec {
            name: "navigate_web".to_string(),
            description: "crawl".to_string(),
            parameters: json!({ "type": "object", "required": ["url"] }),
        }];
        let rendered = to_function_tools(&specs);
        assert_eq!(rendered[0]["type"], "function");
        assert_eq!(rendered[0]["name"], "navigate_web");
        assert_eq!(rendered[0]["parameters"]["required"][0], "url");
    }
}
