use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::orchestrator::GeneratedPortrait;

pub const SUCCESS_MESSAGE: &str = "Portrait generated successfully!";
pub const FAILURE_MESSAGE: &str = "An error occurred during image processing. Please try again.";

/// Response body returned to the booth front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Stage-tagged cause, present on failure only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitOutcome {
    pub fn from_result(result: &Result<GeneratedPortrait, OrchestrationError>) -> Self {
        match result {
            Ok(portrait) => Self {
                success: true,
                message: SUCCESS_MESSAGE.to_string(),
                image_url: Some(portrait.image_url.clone()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                message: FAILURE_MESSAGE.to_string(),
                image_url: None,
                error: Some(format!("[{}] {e}", e.stage())),
            },
        }
    }
}
