use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use booth_comfyui::poller::PollPolicy;
use booth_comfyui::upload::UploadPolicy;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults suitable for a booth running next to a local
/// ComfyUI instance. Override via environment variables (or a `.env` file
/// loaded by the binary).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// ComfyUI HTTP base URL.
    pub comfyui_url: String,
    /// ComfyUI WebSocket base URL; progress logging is off when unset.
    pub comfyui_ws_url: Option<String>,
    /// Workflow template in ComfyUI API format.
    pub workflow_path: PathBuf,
    /// Binding spec file; the built-in mapping is used when unset.
    pub bindings_path: Option<PathBuf>,
    /// Directory holding selectable frame overlays (`<name>.png`).
    pub frames_dir: PathBuf,
    /// Frame name bound when none was selected or its upload failed.
    pub default_frame: String,
    pub upload: UploadPolicy,
    pub poll: PollPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected} (got '{value}')")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            comfyui_url: "http://localhost:8188".to_string(),
            comfyui_ws_url: None,
            workflow_path: PathBuf::from("config/workflow_api.json"),
            bindings_path: None,
            frames_dir: PathBuf::from("public/images"),
            default_frame: "sample_frame.png".to_string(),
            upload: UploadPolicy::default(),
            poll: PollPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                     |
    /// |-------------------------|-----------------------------|
    /// | `COMFYUI_URL`           | `http://localhost:8188`     |
    /// | `COMFYUI_WS_URL`        | unset (no progress logging) |
    /// | `WORKFLOW_PATH`         | `config/workflow_api.json`  |
    /// | `BINDINGS_PATH`         | unset (built-in mapping)    |
    /// | `FRAMES_DIR`            | `public/images`             |
    /// | `DEFAULT_FRAME`         | `sample_frame.png`          |
    /// | `UPLOAD_MAX_ATTEMPTS`   | `3`                         |
    /// | `UPLOAD_RETRY_DELAY_MS` | `2000`                      |
    /// | `UPLOAD_TIMEOUT_SECS`   | `60`                        |
    /// | `POLL_INTERVAL_MS`      | `1000`                      |
    /// | `POLL_TIMEOUT_SECS`     | `600` (`0` waits forever)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_attempts: u32 = parse_var(&get, "UPLOAD_MAX_ATTEMPTS", 3, "a positive integer")?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_MAX_ATTEMPTS",
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }
        let retry_delay_ms: u64 = parse_var(&get, "UPLOAD_RETRY_DELAY_MS", 2000, "a number of milliseconds")?;
        let upload_timeout_secs: u64 = parse_var(&get, "UPLOAD_TIMEOUT_SECS", 60, "a number of seconds")?;
        let poll_interval_ms: u64 = parse_var(&get, "POLL_INTERVAL_MS", 1000, "a number of milliseconds")?;
        let poll_timeout_secs: u64 = parse_var(&get, "POLL_TIMEOUT_SECS", 600, "a number of seconds")?;

        Ok(Self {
            comfyui_url: get("COMFYUI_URL").unwrap_or(defaults.comfyui_url),
            comfyui_ws_url: get("COMFYUI_WS_URL"),
            workflow_path: get("WORKFLOW_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.workflow_path),
            bindings_path: get("BINDINGS_PATH").map(PathBuf::from),
            frames_dir: get("FRAMES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.frames_dir),
            default_frame: get("DEFAULT_FRAME").unwrap_or(defaults.default_frame),
            upload: UploadPolicy {
                max_attempts,
                retry_delay: Duration::from_millis(retry_delay_ms),
                request_timeout: Duration::from_secs(upload_timeout_secs),
            },
            poll: PollPolicy {
                interval: Duration::from_millis(poll_interval_ms),
                timeout: (poll_timeout_secs > 0).then(|| Duration::from_secs(poll_timeout_secs)),
            },
        })
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        }),
    }
}
