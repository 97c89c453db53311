//! Infrastructure layer: directory adapters, job persistence and execution.

pub mod directory;
pub mod jobs;
