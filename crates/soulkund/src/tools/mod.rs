//! Tool catalog: the registry mapping action names to parameter schemas,
//! risk classifications, and handlers.
//!
//! The catalog is constructed once at startup and injected wherever it is
//! needed — there is no global registry. Handlers receive validated
//! parameters and the request scope; they return domain results and the
//! executor owns normalization.

pub mod goals;
pub mod knowledge;
pub mod tasks;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use soulkun_shared::{
    HandlerError, HandlerReply, ParamViolation, RiskLevel, Scope, ToolCall, ToolSpec,
};

use crate::storage::Storage;

/// A business action handler.
///
/// Handlers are transport-agnostic: they see parameters and the tenancy
/// scope, nothing about ChatWork or Telegram.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError>;
}

struct ToolEntry {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of every invocable tool.
pub struct ToolCatalog {
    entries: HashMap<String, ToolEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        info!(tool = %spec.name, risk = ?spec.risk, "registered tool");
        self.entries.insert(spec.name.clone(), ToolEntry { spec, handler });
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries.get(name).map(|e| Arc::clone(&e.handler))
    }

    pub fn risk(&self, name: &str) -> Option<RiskLevel> {
        self.entries.get(name).map(|e| e.spec.risk)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate a call against the registered schema. Fails closed on any
    /// mismatch, including an unknown tool name.
    pub fn validate(&self, call: &ToolCall) -> Result<(), ParamViolation> {
        match self.entries.get(&call.name) {
            Some(entry) => entry.spec.validate(&call.params),
            None => Err(ParamViolation::UnknownTool(call.name.clone())),
        }
    }

    /// Schema fragments for the LLM provider, name-sorted for a stable
    /// prompt.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| self.entries[n].spec.schema_json())
            .collect()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the standard catalog with every built-in business tool.
pub fn default_catalog(storage: Arc<dyn Storage>) -> ToolCatalog {
    let mut catalog = ToolCatalog::new();
    goals::register(&mut catalog, Arc::clone(&storage));
    tasks::register(&mut catalog, Arc::clone(&storage));
    knowledge::register(&mut catalog, storage);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use soulkun_shared::{ParamKind, ParamSpec};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(
            &self,
            params: &serde_json::Value,
            _scope: &Scope,
        ) -> Result<HandlerReply, HandlerError> {
            Ok(HandlerReply::new("echo", params.clone()))
        }
    }

    fn catalog_with_echo() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolSpec {
                name: "echo".to_string(),
                description: "echo params".to_string(),
                risk: RiskLevel::ReadOnly,
                params: vec![ParamSpec::required("text", ParamKind::String, "text")],
            },
            Arc::new(EchoHandler),
        );
        catalog
    }

    #[test]
    fn test_validate_unknown_tool() {
        let catalog = catalog_with_echo();
        let err = catalog
            .validate(&ToolCall::new("missing", json!({})))
            .unwrap_err();
        assert!(matches!(err, ParamViolation::UnknownTool(_)));
    }

    #[test]
    fn test_validate_known_tool() {
        let catalog = catalog_with_echo();
        assert!(catalog
            .validate(&ToolCall::new("echo", json!({"text": "hi"})))
            .is_ok());
        assert!(catalog
            .validate(&ToolCall::new("echo", json!({"text": 5})))
            .is_err());
    }

    #[test]
    fn test_schemas_sorted_and_complete() {
        let catalog = catalog_with_echo();
        let schemas = catalog.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["name"], "echo");
    }

    #[tokio::test]
    async fn test_default_catalog_registers_business_tools() {
        let catalog = default_catalog(Arc::new(crate::storage::NullStorage));
        for name in [
            "create_goal",
            "list_goals",
            "update_goal_progress",
            "delete_goal",
            "create_task",
            "complete_task",
            "list_tasks",
            "set_reminder",
            "search_knowledge",
            "teach_rule",
        ] {
            assert!(catalog.spec(name).is_some(), "missing tool {name}");
        }
        assert_eq!(catalog.risk("delete_goal"), Some(RiskLevel::High));
    }
}
