//! Tool registry for name-based tool resolution
//!
//! Maps tool names to descriptors and handlers. Registration order is kept,
//! so the tool list offered to the LLM is stable across runs.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::descriptor::ToolDescriptor;
use super::handler::{ToolHandler, ToolOutput};
use crate::error::{EngineError, Result};

/// Which tools a graph or subgraph may see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tools", rename_all = "snake_case")]
pub enum ToolSelection {
    /// Every tool in the registry
    #[default]
    All,
    /// Only the named tools
    Named(Vec<String>),
    /// No tools at all
    None,
}

impl ToolSelection {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == tool),
            Self::None => false,
        }
    }
}

/// A registration entry combining the descriptor with its handler
struct RegistryEntry {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tools keyed by unique name
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; fails if the name is taken
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<()> {
        self.register_shared(descriptor, Arc::new(handler))
    }

    /// Register a tool with an already shared handler
    pub fn register_shared(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(EngineError::DuplicateTool(descriptor.name));
        }
        log::debug!("Registering tool '{}'", descriptor.name);
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(RegistryEntry {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Get the handler for a tool
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>> {
        self.entry(name).map(|e| e.handler.clone())
    }

    /// Get the descriptor for a tool
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entry(name).ok().map(|e| &e.descriptor)
    }

    /// All descriptors in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Descriptors of the tools a selection allows, in registration order
    pub fn select(&self, selection: &ToolSelection) -> Vec<ToolDescriptor> {
        self.entries
            .iter()
            .filter(|e| selection.allows(&e.descriptor.name))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Check that every tool a selection names is registered
    pub fn check_selection(&self, selection: &ToolSelection) -> Result<()> {
        if let ToolSelection::Named(names) = selection {
            if let Some(missing) = names.iter().find(|n| !self.has_tool(n)) {
                return Err(EngineError::ToolNotFound(missing.clone()));
            }
        }
        Ok(())
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate arguments, then run the handler
    ///
    /// Handler errors and panics come back as [`EngineError::ToolExecution`];
    /// argument problems come back as [`EngineError::Validation`].
    pub async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput> {
        let entry = self.entry(name)?;
        entry
            .descriptor
            .validate(&args)
            .map_err(|message| EngineError::Validation {
                tool: name.to_string(),
                message,
            })?;

        let handler = entry.handler.clone();
        let outcome = std::panic::AssertUnwindSafe(handler.execute(args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(EngineError::InvalidArguments(message))) => Err(EngineError::Validation {
                tool: name.to_string(),
                message,
            }),
            Ok(Err(e)) => Err(EngineError::ToolExecution {
                tool: name.to_string(),
                message: e.to_string(),
            }),
            Err(panic) => Err(EngineError::ToolExecution {
                tool: name.to_string(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Merge another registry into this one; names must not collide
    pub fn merge(&mut self, other: ToolRegistry) -> Result<()> {
        for entry in other.entries {
            self.register_shared(entry.descriptor, entry.handler)?;
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&RegistryEntry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ParameterType, ToolParameter, TypedTool};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    fn add_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("add", "Add two integers")
            .required(ToolParameter::new("a", "left", ParameterType::Integer))
            .required(ToolParameter::new("b", "right", ParameterType::Integer))
    }

    fn make_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                add_descriptor(),
                TypedTool::new(|args: Add| async move { Ok(args.a + args.b) }),
            )
            .unwrap();
        registry
            .register(
                ToolDescriptor::new("fail", "Always fails"),
                FnTool::new(|_| async { Err(EngineError::failed("disk full")) }),
            )
            .unwrap();
        registry
            .register(
                ToolDescriptor::new("explode", "Panics"),
                FnTool::new(|_| async { panic!("kaboom") }),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_register_resolve_invoke() {
        let registry = make_registry();
        assert!(registry.resolve("add").is_ok());
        let output = registry.invoke("add", json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(output, ToolOutput::Structured(json!(3)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = make_registry();
        let err = registry
            .register(add_descriptor(), FnTool::new(|_| async { Ok(ToolOutput::Raw(String::new())) }))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTool(name) if name == "add"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = make_registry();
        assert!(matches!(registry.resolve("nope"), Err(EngineError::ToolNotFound(_))));
        let err = registry.invoke("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_required_is_validation_error() {
        let registry = make_registry();
        let err = registry.invoke("add", json!({"a": 1})).await.unwrap_err();
        match err {
            EngineError::Validation { tool, message } => {
                assert_eq!(tool, "add");
                assert!(message.contains("'b'"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let registry = make_registry();
        let err = registry.invoke("fail", Value::Null).await.unwrap_err();
        match err {
            EngineError::ToolExecution { tool, message } => {
                assert_eq!(tool, "fail");
                assert!(message.contains("disk full"));
            }
            other => panic!("Expected ToolExecution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_arguments_are_validation_errors() {
        // No declared parameters, so only the typed decode can reject the call.
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("loose_add", "Add without declared parameters"),
                TypedTool::new(|args: Add| async move { Ok(args.a + args.b) }),
            )
            .unwrap();

        let err = registry.invoke("loose_add", json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { ref tool, .. } if tool == "loose_add"));
    }

    #[tokio::test]
    async fn test_nested_validation_error_is_execution_error() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("proxy", "Calls another registry"),
                FnTool::new(|_| async {
                    let inner = make_registry();
                    inner.invoke("add", json!({"a": 1})).await
                }),
            )
            .unwrap();

        let err = registry.invoke("proxy", Value::Null).await.unwrap_err();
        match err {
            EngineError::ToolExecution { tool, message } => {
                assert_eq!(tool, "proxy");
                assert!(message.contains("'add'"));
            }
            other => panic!("Expected ToolExecution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_is_wrapped() {
        let registry = make_registry();
        let err = registry.invoke("explode", Value::Null).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolExecution { ref message, .. } if message.contains("kaboom")));
    }

    #[test]
    fn test_selection() {
        let registry = make_registry();
        let selection = ToolSelection::named(["add"]);
        let names: Vec<String> = registry.select(&selection).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["add"]);
        assert!(registry.select(&ToolSelection::None).is_empty());
        assert_eq!(registry.select(&ToolSelection::All).len(), 3);

        assert!(registry.check_selection(&selection).is_ok());
        assert!(matches!(
            registry.check_selection(&ToolSelection::named(["missing"])),
            Err(EngineError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_merge_rejects_collisions() {
        let mut registry = make_registry();
        let mut other = ToolRegistry::new();
        other
            .register(
                ToolDescriptor::new("echo", "Echo"),
                FnTool::new(|args| async move { Ok(ToolOutput::Structured(args)) }),
            )
            .unwrap();
        registry.merge(other).unwrap();
        assert_eq!(registry.names(), vec!["add", "fail", "explode", "echo"]);

        let mut clash = ToolRegistry::new();
        clash
            .register(add_descriptor(), FnTool::new(|_| async { Ok(ToolOutput::Raw(String::new())) }))
            .unwrap();
        assert!(registry.merge(clash).is_err());
    }
}
