//! Lane-based priority job scheduling.
//!
//! Submodules cover the job data model and lane routing, the durable job
//! store, the queue brokers, the dual-mode scheduler, and the worker loop.

pub mod broker;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod worker;

pub use scheduler::{JobScheduler, PipelineContext, ScheduleError, SchedulerApi};
pub use types::{Job, JobFilter, JobStatus, Lane, classify_lane};
