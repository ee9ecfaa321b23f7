//! Declarative binding of request values into a workflow template.
//!
//! A [`BindingSpec`] names the node inputs that receive the subject photo,
//! the frame overlay, and each interpolated prompt text, plus the node whose
//! output is the finished portrait. Text templates use `{placeholder}`
//! tokens resolved against [`PortraitFields`].

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::{BoundAssets, PortraitFields, FIELD_NAMES};
use crate::workflow::{input_slot_mut, WorkflowTemplate};

/// Regex matching `{placeholder}` tokens in text templates.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

/// Node whose `images` output holds the composited portrait.
pub const DEFAULT_OUTPUT_NODE: &str = "20";

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

/// Address of a single input slot: `workflow[node].inputs[input]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub node: String,
    pub input: String,
}

impl SlotRef {
    pub fn new(node: &str, input: &str) -> Self {
        Self {
            node: node.to_string(),
            input: input.to_string(),
        }
    }
}

/// A text input filled by interpolating form fields into `template`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSlot {
    pub node: String,
    pub input: String,
    pub template: String,
}

/// Mapping from request values to workflow slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    #[serde(default = "default_output_node")]
    pub output_node: String,
    pub subject_image: SlotRef,
    pub frame_image: SlotRef,
    #[serde(default)]
    pub text_slots: Vec<TextSlot>,
}

fn default_output_node() -> String {
    DEFAULT_OUTPUT_NODE.to_string()
}

impl Default for BindingSpec {
    /// Mapping for the stock band-portrait workflow.
    fn default() -> Self {
        let text = |input: &str, template: &str| TextSlot {
            node: "29".to_string(),
            input: input.to_string(),
            template: template.to_string(),
        };
        Self {
            output_node: default_output_node(),
            subject_image: SlotRef::new("11", "image"),
            frame_image: SlotRef::new("38", "image"),
            text_slots: vec![
                text("text_1", "{gender} {position} of a {band_genre} band"),
                text("text_2", "performing a concert with {expression} expression"),
                text("text_3", "at a {venue}"),
                text("text_6", "{position} in foreground"),
            ],
        }
    }
}

impl BindingSpec {
    /// Parse a spec from JSON and check its text templates.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let spec: Self = serde_json::from_str(text)
            .map_err(|e| CoreError::Template(format!("Invalid binding spec: {e}")))?;
        spec.check_placeholders()?;
        Ok(spec)
    }

    /// Read and parse a spec file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Template(format!("Cannot read binding spec {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Every text template may only reference known field names.
    pub fn check_placeholders(&self) -> Result<(), CoreError> {
        for slot in &self.text_slots {
            let unknown: Vec<String> = extract_placeholders(&slot.template)
                .into_iter()
                .filter(|p| !FIELD_NAMES.contains(&p.as_str()))
                .collect();
            if !unknown.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Template for {}.{} references unknown fields: {}",
                    slot.node,
                    slot.input,
                    unknown.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Confirm that every slot this spec writes exists in `template`.
    ///
    /// Meant to run once at startup so a mismatched template is caught
    /// before the first request.
    pub fn validate_against(&self, template: &WorkflowTemplate) -> Result<(), CoreError> {
        for (node, input) in self.slots() {
            if template.input(node, input).is_none() {
                return Err(CoreError::SchemaMismatch {
                    node: node.to_string(),
                    input: input.to_string(),
                });
            }
        }
        Ok(())
    }

    fn slots(&self) -> impl Iterator<Item = (&str, &str)> {
        [&self.subject_image, &self.frame_image]
            .into_iter()
            .map(|s| (s.node.as_str(), s.input.as_str()))
            .chain(
                self.text_slots
                    .iter()
                    .map(|s| (s.node.as_str(), s.input.as_str())),
            )
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// A workflow ready for submission, with its per-job correlation token.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundJob {
    /// Client identifier sent alongside the workflow. Time-ordered UUID.
    pub client_id: String,
    pub workflow: Value,
}

impl BoundJob {
    /// Current value of `node.inputs.input` in the bound workflow.
    pub fn input(&self, node: &str, input: &str) -> Option<&Value> {
        self.workflow
            .get(node)
            .and_then(|n| n.get("inputs"))
            .and_then(|inputs| inputs.get(input))
    }
}

/// Bind assets and form fields into a copy of `template`.
///
/// The template is left untouched. Every slot named by `spec` must already
/// exist in the template; a missing one fails with
/// [`CoreError::SchemaMismatch`].
pub fn bind(
    template: &WorkflowTemplate,
    spec: &BindingSpec,
    assets: &BoundAssets,
    fields: &PortraitFields,
) -> Result<BoundJob, CoreError> {
    let mut document = template.to_document();

    let slot = input_slot_mut(&mut document, &spec.subject_image.node, &spec.subject_image.input)?;
    *slot = Value::String(assets.subject.clone());

    let slot = input_slot_mut(&mut document, &spec.frame_image.node, &spec.frame_image.input)?;
    *slot = Value::String(assets.frame.clone());

    for text_slot in &spec.text_slots {
        let text = interpolate(&text_slot.template, fields)?;
        let slot = input_slot_mut(&mut document, &text_slot.node, &text_slot.input)?;
        *slot = Value::String(text);
    }

    Ok(BoundJob {
        client_id: uuid::Uuid::now_v7().to_string(),
        workflow: Value::Object(document),
    })
}

/// Replace every `{placeholder}` in `template` with the matching field.
fn interpolate(template: &str, fields: &PortraitFields) -> Result<String, CoreError> {
    let mut unresolved = Vec::new();
    let text = PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| match fields.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                unresolved.push(caps[1].to_string());
                caps[0].to_string()
            }
        })
        .into_owned();

    if unresolved.is_empty() {
        Ok(text)
    } else {
        Err(CoreError::Validation(format!(
            "Unknown placeholders in text template: {}",
            unresolved.join(", ")
        )))
    }
}

/// Extract placeholder keys from a template string.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
