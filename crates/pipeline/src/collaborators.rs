//! External collaborators, consumed as black boxes.
//!
//! Every collaborator reports failures as [`ProviderError`] so the resilience
//! layer can decide whether to retry. None of them is ever called directly by
//! a stage; calls go through a [`pressroom_resilience::ProviderChain`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pressroom_core::{ItemId, JobId, ProcessedItem, RawItem, TextSpan};
use pressroom_resilience::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub job_id: JobId,
    /// Empty means the fetcher's own default sources.
    pub sources: Vec<String>,
    pub max_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
}

/// One change reported by a rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNote {
    pub note: String,
    /// Range of the original body this change concerns.
    #[serde(default)]
    pub span: Option<TextSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOutput {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub views: BTreeMap<String, String>,
    #[serde(default)]
    pub changes: Vec<ChangeNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledEntry {
    pub item_id: ItemId,
    pub source_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub category: String,
    pub entries: Vec<AssembledEntry>,
}

/// Final output structure produced by the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledOutput {
    pub sections: Vec<Section>,
}

impl AssembledOutput {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.sections
            .iter()
            .flat_map(|s| s.entries.iter().map(|e| e.item_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// 0.0 (unusable) to 1.0 (excellent).
    pub score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub output: AssembledOutput,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawItem>, ProviderError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &ProcessedItem) -> Result<Classification, ProviderError>;
}

#[async_trait]
pub trait Rewriter: Send + Sync {
    /// Rewrite `item`, producing every view named in `views`.
    async fn rewrite(
        &self,
        item: &ProcessedItem,
        views: &[String],
    ) -> Result<RewriteOutput, ProviderError>;
}

#[async_trait]
pub trait Assembler: Send + Sync {
    /// Group accepted items, given newest first, into the final output.
    async fn assemble(&self, items: &[ProcessedItem]) -> Result<AssembledOutput, ProviderError>;
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, output: &AssembledOutput) -> Result<EvaluationReport, ProviderError>;
}

#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(
        &self,
        output: &AssembledOutput,
        evaluation: Option<&EvaluationReport>,
    ) -> Result<OptimizationOutcome, ProviderError>;
}
