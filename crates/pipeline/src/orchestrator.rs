//! End-to-end portrait generation.
//!
//! [`PortraitPipeline::generate`] runs one request as a single task:
//! upload the subject photo, upload the selected frame (falling back to the
//! default frame on any failure), bind the workflow, submit it, then poll
//! history until the output image exists.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use booth_comfyui::api::ComfyUIApi;
use booth_comfyui::client::ComfyUIClient;
use booth_comfyui::history::ArtifactLocator;
use booth_comfyui::monitor::spawn_monitor;
use booth_comfyui::poller::{await_completion, PollError, PollPolicy};
use booth_comfyui::upload::{upload_asset, UploadPolicy};
use booth_core::binding::{bind, BindingSpec, BoundJob};
use booth_core::error::CoreError;
use booth_core::types::{BoundAssets, PortraitFields};
use booth_core::workflow::WorkflowTemplate;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{OrchestrationError, Stage};

/// Upper bound on opening the progress WebSocket.
const MONITOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One portrait request as handed over by the front end.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Captured photo on local disk. Owned and cleaned up by the caller.
    pub subject_path: PathBuf,
    /// Frame overlay name, resolved to `<frames_dir>/<name>.png`.
    pub frame: Option<String>,
    pub fields: PortraitFields,
}

/// A finished portrait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPortrait {
    /// `GET /view` URL serving the image.
    pub image_url: String,
    pub artifact: ArtifactLocator,
}

/// Shared, immutable pipeline. Cheap to call concurrently from many tasks.
#[derive(Debug)]
pub struct PortraitPipeline {
    api: ComfyUIApi,
    ws_client: Option<ComfyUIClient>,
    template: Arc<WorkflowTemplate>,
    bindings: Arc<BindingSpec>,
    frames_dir: PathBuf,
    default_frame: String,
    upload: UploadPolicy,
    poll: PollPolicy,
}

impl PortraitPipeline {
    /// Load the workflow template and binding spec named by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, CoreError> {
        let template = WorkflowTemplate::load(&config.workflow_path)?;
        let bindings = match &config.bindings_path {
            Some(path) => BindingSpec::load(path)?,
            None => BindingSpec::default(),
        };
        Self::new(config, template, bindings)
    }

    /// Build a pipeline from an already loaded template and spec.
    ///
    /// Fails if the binding spec writes a slot the template lacks, so a mismatch
    /// surfaces at startup rather than on the first request.
    pub fn new(
        config: &PipelineConfig,
        template: WorkflowTemplate,
        bindings: BindingSpec,
    ) -> Result<Self, CoreError> {
        bindings.check_placeholders()?;
        bindings.validate_against(&template)?;

        tracing::info!(
            nodes = template.node_count(),
            text_slots = bindings.text_slots.len(),
            output_node = %bindings.output_node,
            "Workflow template loaded",
        );

        Ok(Self {
            api: ComfyUIApi::new(config.comfyui_url.clone()),
            ws_client: config.comfyui_ws_url.as_deref().map(ComfyUIClient::new),
            template: Arc::new(template),
            bindings: Arc::new(bindings),
            frames_dir: config.frames_dir.clone(),
            default_frame: config.default_frame.clone(),
            upload: config.upload.clone(),
            poll: config.poll.clone(),
        })
    }

    /// Generate one portrait.
    ///
    /// `cancel` is honoured at every stage. Cancelling during an upload
    /// stops before anything is submitted; cancelling during the wait (or
    /// hitting the poll deadline) releases the prompt on the backend.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedPortrait, OrchestrationError> {
        let subject = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled(Stage::SubjectUpload)),
            result = upload_asset(&self.api, &request.subject_path, &self.upload) => {
                result.map_err(OrchestrationError::SubjectUpload)?
            }
        };

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled(Stage::FrameUpload)),
            frame = self.upload_frame(request.frame.as_deref()) => frame,
        };

        let job = bind(
            &self.template,
            &self.bindings,
            &BoundAssets { subject, frame },
            &request.fields,
        )?;

        // Submission is not raced: a dropped request may still create a
        // prompt whose ID would then be lost.
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled(Stage::Submit));
        }

        let monitor_cancel = cancel.child_token();
        let monitor = self.start_monitor(&job.client_id, &monitor_cancel).await;

        let result = self.submit_and_wait(&job, cancel).await;

        monitor_cancel.cancel();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }
        result
    }

    // ---- private helpers ----

    async fn submit_and_wait(
        &self,
        job: &BoundJob,
        cancel: &CancellationToken,
    ) -> Result<GeneratedPortrait, OrchestrationError> {
        let submitted = self
            .api
            .submit_workflow(&job.workflow, &job.client_id)
            .await
            .map_err(|e| {
                tracing::error!(client_id = %job.client_id, error = %e, "Workflow submission rejected");
                OrchestrationError::Submit(e)
            })?;

        tracing::info!(
            client_id = %job.client_id,
            prompt_id = %submitted.prompt_id,
            queue_position = ?submitted.number,
            "Workflow submitted to ComfyUI",
        );

        let artifact = match await_completion(
            &self.api,
            &submitted.prompt_id,
            &self.bindings.output_node,
            &self.poll,
            cancel,
        )
        .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                self.release_prompt(&submitted.prompt_id, &e).await;
                return Err(OrchestrationError::Poll(e));
            }
        };

        let image_url = artifact
            .view_url(self.api.api_url())
            .map_err(OrchestrationError::ResultUrl)?;

        Ok(GeneratedPortrait {
            image_url,
            artifact,
        })
    }

    /// Upload the selected frame, or return the default frame name.
    async fn upload_frame(&self, selection: Option<&str>) -> String {
        let Some(selection) = selection.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.default_frame.clone();
        };

        let Some(path) = frame_path(&self.frames_dir, selection) else {
            tracing::warn!(frame = %selection, "Invalid frame selection, using default frame");
            return self.default_frame.clone();
        };

        match upload_asset(&self.api, &path, &self.upload).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(
                    frame = %selection,
                    default_frame = %self.default_frame,
                    error = %e,
                    "Frame upload failed, using default frame",
                );
                self.default_frame.clone()
            }
        }
    }

    /// Release a prompt whose wait was abandoned so it does not keep
    /// running: delete it from the queue and interrupt it if it is the
    /// prompt executing. A backend failure needs no release.
    async fn release_prompt(&self, prompt_id: &str, reason: &PollError) {
        if matches!(reason, PollError::BackendFailed(_)) {
            return;
        }

        let running = match self.api.get_queue().await {
            Ok(queue) => queue.is_running(prompt_id),
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to read ComfyUI queue");
                false
            }
        };

        if running {
            match self.api.interrupt(prompt_id).await {
                Ok(()) => tracing::info!(prompt_id = %prompt_id, "Abandoned prompt interrupted"),
                Err(e) => tracing::warn!(
                    prompt_id = %prompt_id,
                    error = %e,
                    "Failed to interrupt abandoned prompt",
                ),
            }
        }

        match self.api.cancel_execution(prompt_id).await {
            Ok(()) => tracing::info!(prompt_id = %prompt_id, "Abandoned prompt removed from queue"),
            Err(e) => tracing::warn!(
                prompt_id = %prompt_id,
                error = %e,
                "Failed to remove abandoned prompt from queue",
            ),
        }
    }

    async fn start_monitor(
        &self,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let client = self.ws_client.as_ref()?;
        match tokio::time::timeout(MONITOR_CONNECT_TIMEOUT, client.connect(client_id)).await {
            Ok(Ok(conn)) => Some(spawn_monitor(conn, cancel.clone())),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Progress monitor unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(ws_url = %client.ws_url(), "Progress monitor connect timed out");
                None
            }
        }
    }
}

/// Path of a selectable frame overlay.
///
/// Returns `None` for names that could escape `frames_dir`.
pub fn frame_path(frames_dir: &Path, selection: &str) -> Option<PathBuf> {
    let valid = !selection.starts_with('.')
        && selection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| frames_dir.join(format!("{selection}.png")))
}
