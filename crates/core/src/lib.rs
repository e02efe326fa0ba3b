//! `pressroom-core` — job and content model shared by every pipeline crate.
//!
//! This crate contains **pure** data and state transitions (no I/O). Ledgers,
//! providers and the orchestrator all build on the types defined here.

pub mod config;
pub mod error;
pub mod id;
pub mod item;
pub mod job;

pub use config::{FeatureToggles, GateConfig, JobConfig};
pub use error::{LedgerError, LedgerResult};
pub use id::{ItemId, JobId};
pub use item::{
    Annotation, AnnotationKind, Content, ItemFailure, ProcessedItem, RawItem, Rewrite, SourceRef,
    TextSpan,
};
pub use job::{
    overall_status, FinalizeOutcome, ItemCounts, Job, JobFilter, JobStatus, StageName,
    StageResult, StageStatus,
};
