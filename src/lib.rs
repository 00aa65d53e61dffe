//! Taonga is a document ingestion pipeline with cultural-content protection
//! and a lane-based priority job scheduler.
//!
//! Documents enter as raw bytes plus a filename, are routed to a
//! type-specific extractor (OCR for images, page-capped text extraction for
//! PDFs, inline-image-aware stripping for markup), pass through a reversible
//! protection codec, and end as embedded chunks in a vector store alongside
//! persisted raw and cleaned artifacts. Runs execute either synchronously in
//! the caller's context or through broker lanes consumed by worker processes.
#![deny(missing_docs)]

pub mod api;
pub mod codec;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod processing;
pub mod storage;
pub mod summarize;
pub mod vector_store;
