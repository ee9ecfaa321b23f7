use std::path::PathBuf;
use std::process::ExitCode;

use booth_core::types::PortraitFields;
use booth_pipeline::config::PipelineConfig;
use booth_pipeline::orchestrator::{GenerationRequest, PortraitPipeline};
use booth_pipeline::outcome::SubmitOutcome;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generate one band portrait from a captured photo.
#[derive(Parser, Debug)]
#[command(name = "booth-worker")]
#[command(about = "Band-portrait generation against a ComfyUI backend")]
#[command(version)]
struct Args {
    /// Captured subject photo.
    #[arg(short, long)]
    subject: PathBuf,

    /// Frame overlay name, looked up as `<FRAMES_DIR>/<frame>.png`.
    #[arg(short, long)]
    frame: Option<String>,

    #[arg(long, default_value = "")]
    gender: String,

    #[arg(long, default_value = "")]
    position: String,

    #[arg(long, default_value = "")]
    band_genre: String,

    #[arg(long, default_value = "")]
    expression: String,

    #[arg(long, default_value = "")]
    venue: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "booth_worker=debug,booth_pipeline=debug,booth_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match PortraitPipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(
                error = %e,
                workflow = %config.workflow_path.display(),
                "Failed to load workflow",
            );
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(comfyui_url = %config.comfyui_url, "Booth worker starting");

    let request = GenerationRequest {
        subject_path: args.subject,
        frame: args.frame,
        fields: PortraitFields {
            gender: args.gender,
            position: args.position,
            band_genre: args.band_genre,
            expression: args.expression,
            venue: args.venue,
        },
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, abandoning generation");
            ctrl_c.cancel();
        }
    });

    let result = pipeline.generate(&request, &cancel).await;
    match &result {
        Ok(portrait) => tracing::info!(image_url = %portrait.image_url, "Portrait ready"),
        Err(e) => tracing::error!(stage = %e.stage(), error = %e, "Portrait generation failed"),
    }

    let outcome = SubmitOutcome::from_result(&result);
    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize outcome"),
    }

    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
