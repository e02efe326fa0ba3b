//! `pressroom-pipeline` — job orchestration for the content pipeline.
//!
//! - [`collaborators`]: the provider roles a job calls out to.
//! - [`stages`]: the fixed stage order and per-stage execution.
//! - [`orchestrator`]: runs one job through the stages against the ledger.
//! - [`service`]: starts, lists and cancels jobs; runs them in the background.

pub mod collaborators;
pub mod error;
pub mod events;
pub mod fallback;
pub mod http;
pub mod orchestrator;
pub mod providers;
pub mod service;
pub mod sink;
pub mod stages;

pub use collaborators::{
    AssembledEntry, AssembledOutput, Assembler, ChangeNote, Classification, Classifier,
    EvaluationReport, Evaluator, FetchRequest, Fetcher, OptimizationOutcome, Optimizer,
    RewriteOutput, Rewriter, Section,
};
pub use error::PipelineError;
pub use events::{EventBus, JobEvent};
pub use fallback::{CategoryAssembler, ExtractiveRewriter, KeywordClassifier};
pub use http::HttpCollaborator;
pub use orchestrator::Orchestrator;
pub use providers::{Providers, ProvidersBuilder};
pub use service::{PipelineService, DEFAULT_MAX_CONCURRENT_JOBS};
pub use sink::{InMemoryOutputSink, JobOutput, OutputSink};
pub use stages::{stages_for, RunState, StageContext, StageDescriptor, StageOutcome, StageRunner};
