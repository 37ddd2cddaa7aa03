//! Job lifecycle: model, store, submission, and event streaming.

pub mod model;
pub mod service;
pub mod store;
pub mod stream;

pub use model::{
    DonePayload, Job, JobKind, JobParams, JobProgress, JobResult, JobStatus, LogEntry, LogKind,
    Outcome, ResultPayload,
};
pub use service::{JobService, Submission, spawn_retention_task};
pub use store::{InMemoryJobStore, JobHandle, JobStore};
pub use stream::{StreamConfig, StreamFrame, publish};
