//! WebSocket progress monitor.
//!
//! Reads frames from a ComfyUI connection and logs execution progress for
//! one client. Purely informational: completion is decided by the history
//! poller, and a dropped socket only ends the logging.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIConnection, ComfyUIStream};
use crate::messages::{parse_message, ComfyUIMessage};

/// Whether the monitor should keep reading after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorFlow {
    Continue,
    /// The prompt finished or failed; nothing more to report.
    Finished,
}

/// Spawn a task that logs progress from `conn` until the prompt finishes,
/// the socket closes, or `cancel` fires.
pub fn spawn_monitor(conn: ComfyUIConnection, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ComfyUIConnection {
            client_id,
            mut ws_stream,
        } = conn;
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = process_messages(&mut ws_stream, &client_id) => {}
        }
        tracing::debug!(client_id = %client_id, "Progress monitor stopped");
    })
}

/// Read frames until the stream ends or a terminal message arrives.
async fn process_messages(ws_stream: &mut ComfyUIStream, client_id: &str) {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if handle_text_message(&text, client_id) == MonitorFlow::Finished {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(client_id = %client_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            // Binary frames are latent previews; pings are answered by tungstenite.
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Log one text frame and report whether monitoring is done.
pub fn handle_text_message(text: &str, client_id: &str) -> MonitorFlow {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::trace!(client_id = %client_id, error = %e, "Ignoring unrecognised ComfyUI message");
            return MonitorFlow::Continue;
        }
    };

    let prompt_id = msg.prompt_id().unwrap_or("-").to_string();

    match msg {
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                client_id = %client_id,
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
        }
        ComfyUIMessage::ExecutionStart(_) => {
            tracing::info!(client_id = %client_id, prompt_id = %prompt_id, "Execution started");
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(
                client_id = %client_id,
                prompt_id = %prompt_id,
                cached_nodes = data.nodes.len(),
                "Execution used cache",
            );
        }
        ComfyUIMessage::Executing(data) => match data.node {
            Some(node) => {
                tracing::debug!(client_id = %client_id, prompt_id = %prompt_id, node = %node, "Executing node");
            }
            None => {
                tracing::info!(client_id = %client_id, prompt_id = %prompt_id, "Execution finished");
                return MonitorFlow::Finished;
            }
        },
        ComfyUIMessage::Progress(data) => {
            tracing::info!(
                client_id = %client_id,
                prompt_id = %prompt_id,
                value = data.value,
                max = data.max,
                percent = data.percent(),
                "Generation progress",
            );
        }
        ComfyUIMessage::Executed(data) => {
            tracing::debug!(client_id = %client_id, prompt_id = %prompt_id, node = %data.node, "Node produced output");
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::warn!(
                client_id = %client_id,
                prompt_id = %prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error reported over WebSocket",
            );
            return MonitorFlow::Finished;
        }
    }

    MonitorFlow::Continue
}
