//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! ComfyUI returns `{}` while a prompt is queued or running. Once it
//! finishes, the body holds a record keyed by the prompt ID:
//!
//! ```json
//! {
//!   "<prompt_id>": {
//!     "outputs": { "20": { "images": [
//!       { "filename": "band_00001_.png", "subfolder": "", "type": "output" }
//!     ] } },
//!     "status": { "status_str": "success", "completed": true, "messages": [] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ComfyUIApiError;

/// Location of a generated artifact on the ComfyUI server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocator {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage kind: `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

impl ArtifactLocator {
    /// Build the `GET /view` URL that serves this artifact.
    pub fn view_url(&self, api_url: &str) -> Result<String, ComfyUIApiError> {
        let base = format!("{}/view", api_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{base}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("filename", &self.filename)
            .append_pair("subfolder", &self.subfolder)
            .append_pair("type", &self.kind);
        Ok(url.into())
    }
}

/// What one history response says about a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    /// No record yet, or the output node has not produced images.
    Pending,
    /// The output node reported at least one image; this is the first.
    Complete(ArtifactLocator),
    /// The backend finished the prompt without a usable output.
    Failed(String),
}

/// Inspect a history response for `prompt_id`'s output on `output_node`.
pub fn inspect_history(history: &Value, prompt_id: &str, output_node: &str) -> HistoryState {
    let Some(record) = history.get(prompt_id) else {
        return HistoryState::Pending;
    };

    let first_image = record
        .get("outputs")
        .and_then(|outputs| outputs.get(output_node))
        .and_then(|node| node.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first());

    if let Some(image) = first_image {
        return match ArtifactLocator::deserialize(image) {
            Ok(locator) => HistoryState::Complete(locator),
            Err(e) => HistoryState::Failed(format!(
                "Output node {output_node} reported a malformed image entry: {e}"
            )),
        };
    }

    let Some(status) = record.get("status") else {
        return HistoryState::Pending;
    };

    if status.get("status_str").and_then(Value::as_str) == Some("error") {
        return HistoryState::Failed(
            execution_error_message(status)
                .unwrap_or_else(|| "ComfyUI reported an execution error".to_string()),
        );
    }

    if status.get("completed").and_then(Value::as_bool) == Some(true) {
        return HistoryState::Failed(format!(
            "Prompt completed without images on output node {output_node}"
        ));
    }

    HistoryState::Pending
}

/// Pull the exception text out of `status.messages`.
///
/// Messages are `[kind, data]` pairs; the error arrives as
/// `["execution_error", {"exception_message": ..., "node_id": ...}]`.
fn execution_error_message(status: &Value) -> Option<String> {
    status
        .get("messages")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .map(|data| {
            let message = data
                .get("exception_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            match data.get("node_id").and_then(Value::as_str) {
                Some(node) => format!("Node {node} failed: {message}"),
                None => message.to_string(),
            }
        })
}
