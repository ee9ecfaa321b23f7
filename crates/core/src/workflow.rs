//! ComfyUI workflow template document.
//!
//! A workflow in API format is an object keyed by node ID, where each node
//! carries a `class_type` and an `inputs` object:
//!
//! ```json
//! {
//!   "11": {
//!     "class_type": "LoadImage",
//!     "inputs": { "image": "example.png" }
//!   }
//! }
//! ```
//!
//! The schema belongs to the backend, so the document is held as an opaque
//! JSON map. Only node/input addressing is typed.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Immutable workflow template.
///
/// Binding never touches the template itself; it works on a copy obtained
/// from [`WorkflowTemplate::to_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    nodes: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Wrap a parsed workflow JSON value.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(nodes) if nodes.is_empty() => Err(CoreError::Template(
                "Workflow JSON must contain at least one node".to_string(),
            )),
            Value::Object(nodes) => Ok(Self { nodes }),
            _ => Err(CoreError::Template(
                "Workflow JSON must be an object".to_string(),
            )),
        }
    }

    /// Parse a workflow from its JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::Template(format!("Invalid workflow JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Read and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Template(format!("Cannot read workflow {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Current value of `node.inputs.input`, if the slot exists.
    pub fn input(&self, node: &str, input: &str) -> Option<&Value> {
        self.nodes
            .get(node)
            .and_then(|n| n.get("inputs"))
            .and_then(|inputs| inputs.get(input))
    }

    /// Deep copy of the node map, ready to be mutated by the binder.
    pub fn to_document(&self) -> Map<String, Value> {
        self.nodes.clone()
    }
}

/// Mutable reference to an existing input slot of a workflow document.
///
/// Fails with [`CoreError::SchemaMismatch`] when the node, its `inputs`
/// object, or the named input is missing. Slots are never created.
pub(crate) fn input_slot_mut<'a>(
    document: &'a mut Map<String, Value>,
    node: &str,
    input: &str,
) -> Result<&'a mut Value, CoreError> {
    document
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .and_then(|inputs| inputs.get_mut(input))
        .ok_or_else(|| CoreError::SchemaMismatch {
            node: node.to_string(),
            input: input.to_string(),
        })
}
