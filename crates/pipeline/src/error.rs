use std::fmt;

use booth_comfyui::api::ComfyUIApiError;
use booth_comfyui::poller::PollError;
use booth_comfyui::upload::UploadError;
use booth_core::error::CoreError;

/// Pipeline step a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SubjectUpload,
    FrameUpload,
    Bind,
    Submit,
    Poll,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SubjectUpload => "subject_upload",
            Stage::FrameUpload => "frame_upload",
            Stage::Bind => "bind",
            Stage::Submit => "submit",
            Stage::Poll => "poll",
        };
        f.write_str(name)
    }
}

/// A failed portrait generation, tagged with the stage that failed.
///
/// The ComfyUI prompt ID never appears here; a failure carries no handle
/// the caller could act on.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Subject upload failed: {0}")]
    SubjectUpload(#[source] UploadError),

    #[error("Workflow binding failed: {0}")]
    Bind(#[from] CoreError),

    #[error("Job submission failed: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error("Waiting for the portrait failed: {0}")]
    Poll(#[source] PollError),

    /// The caller cancelled before any prompt was submitted.
    #[error("Generation cancelled during {0}")]
    Cancelled(Stage),

    /// The artifact exists but its view URL could not be built.
    #[error("Portrait URL could not be built: {0}")]
    ResultUrl(#[source] ComfyUIApiError),
}

impl OrchestrationError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::SubjectUpload(_) => Stage::SubjectUpload,
            Self::Bind(_) => Stage::Bind,
            Self::Submit(_) => Stage::Submit,
            Self::Poll(_) | Self::ResultUrl(_) => Stage::Poll,
            Self::Cancelled(stage) => *stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(Stage::SubjectUpload.to_string(), "subject_upload");
        assert_eq!(Stage::Poll.to_string(), "poll");
    }

    #[test]
    fn cancellation_reports_its_stage() {
        let err = OrchestrationError::Cancelled(Stage::FrameUpload);
        assert_eq!(err.stage(), Stage::FrameUpload);
        assert_eq!(err.to_string(), "Generation cancelled during frame_upload");
    }

    #[test]
    fn wraps_cause_with_stage() {
        let err = OrchestrationError::SubjectUpload(UploadError::FileNotFound {
            path: PathBuf::from("/tmp/missing.png"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(err.stage(), Stage::SubjectUpload);
        assert_eq!(
            err.to_string(),
            "Subject upload failed: File not found: /tmp/missing.png"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn schema_mismatch_is_bind_stage() {
        let err: OrchestrationError = CoreError::SchemaMismatch {
            node: "38".into(),
            input: "image".into(),
        }
        .into();
        assert_eq!(err.stage(), Stage::Bind);
    }
}
