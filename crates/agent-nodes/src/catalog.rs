//! Link-time catalog of built-in node kinds
//!
//! Every built-in node constructor submits a [`KindFn`] next to its
//! definition, so hosts can list what is available without keeping a
//! separate table in sync:
//!
//! ```ignore
//! inventory::submit!(agent_nodes::catalog::KindFn(my_kind));
//! ```

use serde::{Deserialize, Serialize};

/// Grouping for node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Llm,
    Tool,
    History,
    Prompt,
    Control,
}

/// Static description of a built-in node kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKindMetadata {
    /// Unique kind identifier (e.g., "llm-request")
    pub kind: String,
    pub category: NodeCategory,
    pub label: String,
    pub description: String,
    /// Rust type of the node input
    pub input: String,
    /// Rust type of the node output
    pub output: String,
}

impl NodeKindMetadata {
    pub fn new(
        kind: &str,
        category: NodeCategory,
        label: &str,
        description: &str,
        input: &str,
        output: &str,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            category,
            label: label.to_string(),
            description: description.to_string(),
            input: input.to_string(),
            output: output.to_string(),
        }
    }
}

/// Link-time registration of a node kind
pub struct KindFn(pub fn() -> NodeKindMetadata);

inventory::collect!(KindFn);

/// Every registered kind, sorted by kind identifier
pub fn builtin_kinds() -> Vec<NodeKindMetadata> {
    let mut kinds: Vec<NodeKindMetadata> = inventory::iter::<KindFn>.into_iter().map(|f| (f.0)()).collect();
    kinds.sort_by(|a, b| a.kind.cmp(&b.kind));
    kinds
}

pub fn find_kind(kind: &str) -> Option<NodeKindMetadata> {
    inventory::iter::<KindFn>
        .into_iter()
        .map(|f| (f.0)())
        .find(|meta| meta.kind == kind)
}

pub fn kinds_in(category: NodeCategory) -> Vec<NodeKindMetadata> {
    builtin_kinds()
        .into_iter()
        .filter(|meta| meta.category == category)
        .collect()
}
