//! Domain logic for the portrait booth: the ComfyUI workflow template
//! document, the declarative binding spec, and the binder that turns a
//! template plus request values into a submittable job.
//!
//! Nothing in this crate talks to the network.

pub mod binding;
pub mod error;
pub mod types;
pub mod workflow;
