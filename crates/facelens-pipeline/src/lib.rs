//! facelens-pipeline — Live recognition over a camera stream.
//!
//! Admits at most one frame at a time, rotates it upright, runs the
//! recognition engine on it, and publishes overlay-space labels for the
//! most recently completed frame.

pub mod admission;
pub mod config;
pub mod engine;

pub use admission::{AdmissionGate, AdmissionState};
pub use config::{Config, PipelineConfig};
pub use engine::{spawn_pipeline, FrameOutput, PipelineError, PipelineHandle, PipelineStats};
