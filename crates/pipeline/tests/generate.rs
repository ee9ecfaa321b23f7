//! End-to-end generation against the scripted ComfyUI stand-in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_matches::assert_matches;
use booth_comfyui::poller::{PollError, PollPolicy};
use booth_comfyui::upload::UploadPolicy;
use booth_core::binding::BindingSpec;
use booth_core::error::CoreError;
use booth_core::types::PortraitFields;
use booth_core::workflow::WorkflowTemplate;
use booth_pipeline::config::PipelineConfig;
use booth_pipeline::error::{OrchestrationError, Stage};
use booth_pipeline::orchestrator::{GenerationRequest, PortraitPipeline};
use booth_pipeline::outcome::SubmitOutcome;
use booth_testkit::{MockComfyUI, MockScript, ARTIFACT_FILENAME, PROMPT_ID};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn shipped_workflow_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/workflow_api.json")
}

fn test_config(mock: &MockComfyUI, frames_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        comfyui_url: mock.base_url().to_string(),
        workflow_path: shipped_workflow_path(),
        frames_dir: frames_dir.to_path_buf(),
        upload: UploadPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        },
        poll: PollPolicy {
            interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(5)),
        },
        ..PipelineConfig::default()
    }
}

fn fields() -> PortraitFields {
    PortraitFields {
        gender: "woman".into(),
        position: "drummer".into(),
        band_genre: "punk".into(),
        expression: "fierce".into(),
        venue: "festival main stage".into(),
    }
}

struct Booth {
    dir: tempfile::TempDir,
    frames: PathBuf,
}

impl Booth {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir(&frames).unwrap();
        Self { dir, frames }
    }

    fn capture(&self) -> PathBuf {
        let path = self.dir.path().join("capture.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nsubject").unwrap();
        path
    }

    fn add_frame(&self, name: &str) {
        std::fs::write(self.frames.join(format!("{name}.png")), b"\x89PNG\r\n\x1a\nframe").unwrap();
    }

    fn request(&self, frame: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            subject_path: self.capture(),
            frame: frame.map(str::to_string),
            fields: fields(),
        }
    }
}

fn submitted_input<'a>(submission: &'a Value, node: &str, input: &str) -> &'a Value {
    &submission["prompt"][node]["inputs"][input]
}

#[tokio::test]
async fn generates_portrait_with_default_frame() {
    let mock = MockComfyUI::start(MockScript::default()).await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let portrait = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        portrait.image_url,
        format!(
            "{}/view?filename={ARTIFACT_FILENAME}&subfolder=&type=output",
            mock.base_url()
        )
    );
    assert_eq!(mock.uploaded_files(), vec!["capture.png"]);

    let submissions = mock.submissions();
    assert_eq!(submissions.len(), 1);
    let sent = &submissions[0];
    assert_eq!(submitted_input(sent, "11", "image"), "capture.png");
    assert_eq!(submitted_input(sent, "38", "image"), "sample_frame.png");
    assert_eq!(submitted_input(sent, "29", "text_1"), "woman drummer of a punk band");
    assert_eq!(
        submitted_input(sent, "29", "text_2"),
        "performing a concert with fierce expression"
    );
    assert_eq!(submitted_input(sent, "29", "text_3"), "at a festival main stage");
    assert_eq!(submitted_input(sent, "29", "text_6"), "drummer in foreground");
    // Slots outside the binding keep their template values.
    assert_eq!(
        submitted_input(sent, "29", "text_4"),
        "photorealistic, dramatic stage lighting"
    );
    assert!(sent["client_id"].as_str().is_some_and(|id| !id.is_empty()));

    let outcome = SubmitOutcome::from_result(&Ok(portrait));
    assert!(outcome.success);
}

#[tokio::test]
async fn selected_frame_is_uploaded_and_bound() {
    let mock = MockComfyUI::start(MockScript::default()).await;
    let booth = Booth::new();
    booth.add_frame("neon");
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    pipeline
        .generate(&booth.request(Some("neon")), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.uploaded_files(), vec!["capture.png", "neon.png"]);
    assert_eq!(submitted_input(&mock.submissions()[0], "38", "image"), "neon.png");
}

#[tokio::test]
async fn failed_frame_upload_falls_back_to_default() {
    let mock = MockComfyUI::start(MockScript {
        failing_files: vec!["neon.png".into()],
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    booth.add_frame("neon");
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let result = pipeline
        .generate(&booth.request(Some("neon")), &CancellationToken::new())
        .await;

    assert!(result.is_ok());
    // One subject upload plus three frame attempts.
    assert_eq!(mock.upload_attempts(), 4);
    assert_eq!(
        submitted_input(&mock.submissions()[0], "38", "image"),
        "sample_frame.png"
    );
}

#[tokio::test]
async fn missing_frame_file_falls_back_to_default() {
    let mock = MockComfyUI::start(MockScript::default()).await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    pipeline
        .generate(&booth.request(Some("absent")), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.upload_attempts(), 1);
    assert_eq!(
        submitted_input(&mock.submissions()[0], "38", "image"),
        "sample_frame.png"
    );
}

#[tokio::test]
async fn subject_upload_failure_stops_before_submit() {
    let mock = MockComfyUI::start(MockScript {
        upload_failures: usize::MAX,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let result = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await;

    let err = result.as_ref().unwrap_err();
    assert_eq!(err.stage(), Stage::SubjectUpload);
    assert!(err.to_string().contains("upload failed after 3 attempt(s)"));
    assert_eq!(mock.upload_attempts(), 3);
    assert!(mock.submissions().is_empty());
    assert_eq!(mock.history_queries(), 0);

    let outcome = SubmitOutcome::from_result(&result);
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("[subject_upload]"));
}

#[tokio::test]
async fn rejected_submission_is_not_polled() {
    let mock = MockComfyUI::start(MockScript {
        prompt_status: 400,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let err = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Submit);
    assert!(err.to_string().contains("400"));
    assert_eq!(mock.submissions().len(), 1);
    assert_eq!(mock.history_queries(), 0);
}

#[tokio::test]
async fn waits_through_pending_history() {
    let mock = MockComfyUI::start(MockScript {
        pending_ticks: 3,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let portrait = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.history_queries(), 4);
    assert_eq!(portrait.artifact.filename, ARTIFACT_FILENAME);
    assert!(mock.deleted_prompts().is_empty());
}

#[tokio::test]
async fn timed_out_prompt_is_removed_from_queue() {
    let mock = MockComfyUI::start(MockScript {
        pending_ticks: usize::MAX,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let mut config = test_config(&mock, &booth.frames);
    config.poll.timeout = Some(Duration::from_millis(100));
    let pipeline = PortraitPipeline::from_config(&config).unwrap();

    let err = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Poll(PollError::TimedOut(_)));
    assert_eq!(mock.deleted_prompts(), vec![PROMPT_ID]);
    assert!(mock.interrupted_prompts().is_empty());
}

#[tokio::test]
async fn cancelled_wait_is_removed_from_queue() {
    let mock = MockComfyUI::start(MockScript {
        pending_ticks: usize::MAX,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let mut config = test_config(&mock, &booth.frames);
    config.poll.timeout = None;
    let pipeline = PortraitPipeline::from_config(&config).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.cancel();
    });

    let err = pipeline
        .generate(&booth.request(None), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Poll(PollError::Cancelled));
    assert_eq!(mock.deleted_prompts(), vec![PROMPT_ID]);
}

#[tokio::test]
async fn cancelled_request_submits_nothing() {
    let mock = MockComfyUI::start(MockScript::default()).await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .generate(&booth.request(None), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Cancelled(Stage::SubjectUpload));
    assert_eq!(mock.upload_attempts(), 0);
    assert!(mock.submissions().is_empty());
    assert!(mock.deleted_prompts().is_empty());
}

#[tokio::test]
async fn cancel_during_frame_retry_submits_nothing() {
    let mock = MockComfyUI::start(MockScript {
        failing_files: vec!["neon.png".into()],
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    booth.add_frame("neon");
    let mut config = test_config(&mock, &booth.frames);
    config.upload.retry_delay = Duration::from_secs(30);
    let pipeline = PortraitPipeline::from_config(&config).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = pipeline
        .generate(&booth.request(Some("neon")), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Cancelled(Stage::FrameUpload));
    assert_eq!(mock.upload_attempts(), 2);
    assert!(mock.submissions().is_empty());
}

#[tokio::test]
async fn timed_out_running_prompt_is_interrupted() {
    let mock = MockComfyUI::start(MockScript {
        pending_ticks: usize::MAX,
        running: true,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let mut config = test_config(&mock, &booth.frames);
    config.poll.timeout = Some(Duration::from_millis(100));
    let pipeline = PortraitPipeline::from_config(&config).unwrap();

    let err = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Poll(PollError::TimedOut(_)));
    assert_eq!(mock.interrupted_prompts(), vec![PROMPT_ID]);
    assert_eq!(mock.deleted_prompts(), vec![PROMPT_ID]);
}

#[tokio::test]
async fn failed_history_query_releases_prompt() {
    let mock = MockComfyUI::start(MockScript {
        history_status: 502,
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let err = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, OrchestrationError::Poll(PollError::Request(_)));
    assert_eq!(mock.deleted_prompts(), vec![PROMPT_ID]);
    assert!(mock.interrupted_prompts().is_empty());
}

#[tokio::test]
async fn backend_failure_surfaces_at_poll_stage() {
    let mock = MockComfyUI::start(MockScript {
        history_record: Some(json!({
            PROMPT_ID: {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", { "node_id": "13", "exception_message": "CUDA out of memory" }]]
                }
            }
        })),
        ..Default::default()
    })
    .await;
    let booth = Booth::new();
    let pipeline = PortraitPipeline::from_config(&test_config(&mock, &booth.frames)).unwrap();

    let err = pipeline
        .generate(&booth.request(None), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Poll);
    assert_matches!(err, OrchestrationError::Poll(PollError::BackendFailed(msg)) if msg.contains("CUDA"));
    assert!(mock.deleted_prompts().is_empty());
}

#[test]
fn mismatched_template_is_rejected_at_startup() {
    let template = WorkflowTemplate::from_value(json!({
        "11": { "class_type": "LoadImage", "inputs": { "image": "a.png" } },
        "29": { "class_type": "Text Concatenate", "inputs": { "text_1": "", "text_2": "", "text_3": "", "text_6": "" } }
    }))
    .unwrap();

    let result = PortraitPipeline::new(&PipelineConfig::default(), template, BindingSpec::default());

    assert_matches!(
        result,
        Err(CoreError::SchemaMismatch { node, input }) if node == "38" && input == "image"
    );
}

#[test]
fn shipped_workflow_matches_shipped_bindings() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let template = WorkflowTemplate::load(&root.join("config/workflow_api.json")).unwrap();
    let bindings = BindingSpec::load(&root.join("config/bindings.json")).unwrap();

    assert_eq!(bindings, BindingSpec::default());
    bindings.validate_against(&template).unwrap();
}
