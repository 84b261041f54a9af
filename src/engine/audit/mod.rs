//! Audit Module
//!
//! Operation log events, their SQLite storage and the batching pipeline

pub mod audit;
pub mod pipeline;

pub use audit::{AuditError, AuditEvent, AuditSink, LogQuery, OperationLog, SqliteAuditSink};
pub use pipeline::{AuditPipeline, AuditProducer, PipelineOptions, StatsSnapshot};
