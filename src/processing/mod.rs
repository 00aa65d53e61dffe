//! Document pipeline orchestration.
//!
//! Submodules cover whitespace normalization, budgeted chunking, the shared
//! run data model, the embed-and-persist stage, and the orchestrator that
//! walks a document through extraction, protection, chunking, and storage.

pub mod chunking;
pub mod embed_store;
pub mod normalize;
pub mod pipeline;
pub mod types;

pub use pipeline::{Pipeline, PipelineOutcome, RunObserver};
pub use types::{ChunkRecord, PipelineRun, RunStatus};
