//! Portrait generation pipeline.
//!
//! Sequences subject upload, optional frame upload with fallback, workflow
//! binding, submission and completion polling into one operation, and
//! maps the result onto the response shape the booth front end expects.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outcome;
