//! ComfyUI REST and WebSocket client library.
//!
//! Wraps the HTTP endpoints the portrait booth needs (image upload,
//! workflow submission, history, queue deletion), the retrying asset
//! uploader, the history poller, and an optional WebSocket progress
//! monitor.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod poller;
pub mod upload;
