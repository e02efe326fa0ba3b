//! Provider chains for every collaborator role.

use std::sync::Arc;

use pressroom_resilience::{ProviderChain, ProviderHealth, ProviderRegistry};

use crate::collaborators::{Assembler, Classifier, Evaluator, Fetcher, Optimizer, Rewriter};
use crate::fallback::{CategoryAssembler, ExtractiveRewriter, KeywordClassifier};

/// One chain per role. Classifier, rewriter and assembler always end in a
/// deterministic fallback; fetcher, evaluator and optimizer have none.
#[derive(Clone)]
pub struct Providers {
    pub fetcher: ProviderChain<dyn Fetcher>,
    pub classifier: ProviderChain<dyn Classifier>,
    pub rewriter: ProviderChain<dyn Rewriter>,
    pub assembler: ProviderChain<dyn Assembler>,
    pub evaluator: ProviderChain<dyn Evaluator>,
    pub optimizer: ProviderChain<dyn Optimizer>,
    registry: Arc<ProviderRegistry>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("fetcher", &self.fetcher)
            .field("classifier", &self.classifier)
            .field("rewriter", &self.rewriter)
            .field("assembler", &self.assembler)
            .field("evaluator", &self.evaluator)
            .field("optimizer", &self.optimizer)
            .finish()
    }
}

impl Providers {
    pub fn builder(registry: Arc<ProviderRegistry>) -> ProvidersBuilder {
        ProvidersBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.registry.snapshot()
    }
}

/// Adds providers in priority order: the first one registered for a role is
/// its primary, later ones are secondaries. Guards come from the shared
/// registry, so a provider name maps to one breaker across all jobs.
pub struct ProvidersBuilder {
    registry: Arc<ProviderRegistry>,
    fetcher: ProviderChain<dyn Fetcher>,
    classifier: ProviderChain<dyn Classifier>,
    rewriter: ProviderChain<dyn Rewriter>,
    assembler: ProviderChain<dyn Assembler>,
    evaluator: ProviderChain<dyn Evaluator>,
    optimizer: ProviderChain<dyn Optimizer>,
}

impl ProvidersBuilder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            fetcher: ProviderChain::new("fetcher"),
            classifier: ProviderChain::new("classifier"),
            rewriter: ProviderChain::new("rewriter"),
            assembler: ProviderChain::new("assembler"),
            evaluator: ProviderChain::new("evaluator"),
            optimizer: ProviderChain::new("optimizer"),
        }
    }

    pub fn fetcher(mut self, name: &str, provider: Arc<dyn Fetcher>) -> Self {
        self.fetcher = self.fetcher.with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn classifier(mut self, name: &str, provider: Arc<dyn Classifier>) -> Self {
        self.classifier = self
            .classifier
            .with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn rewriter(mut self, name: &str, provider: Arc<dyn Rewriter>) -> Self {
        self.rewriter = self.rewriter.with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn assembler(mut self, name: &str, provider: Arc<dyn Assembler>) -> Self {
        self.assembler = self
            .assembler
            .with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn evaluator(mut self, name: &str, provider: Arc<dyn Evaluator>) -> Self {
        self.evaluator = self
            .evaluator
            .with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn optimizer(mut self, name: &str, provider: Arc<dyn Optimizer>) -> Self {
        self.optimizer = self
            .optimizer
            .with_provider(self.registry.guard(name), provider);
        self
    }

    pub fn build(self) -> Providers {
        Providers {
            fetcher: self.fetcher,
            classifier: self.classifier.with_fallback(Arc::new(KeywordClassifier)),
            rewriter: self.rewriter.with_fallback(Arc::new(ExtractiveRewriter)),
            assembler: self.assembler.with_fallback(Arc::new(CategoryAssembler)),
            evaluator: self.evaluator,
            optimizer: self.optimizer,
            registry: self.registry,
        }
    }
}
