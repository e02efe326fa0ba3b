//! Content items as they move through the pipeline.
//!
//! A [`ProcessedItem`] keeps its original representation for its whole life.
//! Stages only *extend* it: classification sets a category, rewriting attaches
//! a [`Rewrite`] next to the original, and every stage appends annotations.
//! Nothing a stage writes ever erases what an earlier stage recorded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::id::ItemId;
use crate::job::StageName;

/// Item as returned by a fetcher, before it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    /// Whether the referenced resource answered when it was fetched.
    #[serde(default = "default_reachable")]
    pub reachable: bool,
}

fn default_reachable() -> bool {
    true
}

/// Where an item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub url: Option<String>,
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub title: String,
    pub body: String,
}

/// Byte range into the original body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Classified,
    Rewritten,
    /// One change made by the rewriter, optionally anchored to a span.
    Change,
    GateVerdict,
    /// A deterministic fallback produced this stage's result.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub stage: StageName,
    pub kind: AnnotationKind,
    pub note: String,
    pub span: Option<TextSpan>,
    /// Provider that produced the annotated result, if any.
    pub provider: Option<String>,
}

impl Annotation {
    pub fn new(stage: StageName, kind: AnnotationKind, note: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            note: note.into(),
            span: None,
            provider: None,
        }
    }

    pub fn with_span(mut self, span: TextSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Rewritten representation, stored alongside the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    pub title: String,
    pub body: String,
    /// Named presentation views (headline, summary, ...).
    #[serde(default)]
    pub views: BTreeMap<String, String>,
}

/// First stage at which the item stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: StageName,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub id: ItemId,
    pub source: SourceRef,
    pub published_at: DateTime<Utc>,
    pub original: Content,
    pub category: Option<String>,
    pub rewrite: Option<Rewrite>,
    pub annotations: Vec<Annotation>,
    pub failure: Option<ItemFailure>,
}

impl ProcessedItem {
    pub fn from_raw(raw: RawItem) -> Self {
        Self {
            id: ItemId::new(),
            source: SourceRef {
                source_id: raw.source_id,
                url: raw.url,
                reachable: raw.reachable,
            },
            published_at: raw.published_at,
            original: Content {
                title: raw.title,
                body: raw.body,
            },
            category: None,
            rewrite: None,
            annotations: Vec::new(),
            failure: None,
        }
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Record a failure. The first failure wins; later ones are kept as annotations.
    pub fn mark_failed(&mut self, stage: StageName, reason: impl Into<String>) {
        let reason = reason.into();
        if self.failure.is_none() {
            self.failure = Some(ItemFailure {
                stage,
                reason: reason.clone(),
            });
        }
        self.annotations.push(Annotation::new(
            stage,
            AnnotationKind::Change,
            format!("failed: {reason}"),
        ));
    }

    /// Still eligible for further processing.
    pub fn is_usable(&self) -> bool {
        self.failure.is_none()
    }

    pub fn effective_title(&self) -> &str {
        self.rewrite
            .as_ref()
            .map(|r| r.title.as_str())
            .unwrap_or(self.original.title.as_str())
    }

    pub fn effective_body(&self) -> &str {
        self.rewrite
            .as_ref()
            .map(|r| r.body.as_str())
            .unwrap_or(self.original.body.as_str())
    }

    pub fn view(&self, name: &str) -> Option<&str> {
        self.rewrite
            .as_ref()
            .and_then(|r| r.views.get(name))
            .map(String::as_str)
    }

    /// Stable fingerprint of the original content (case and whitespace insensitive).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize(&self.original.title).as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize(&self.original.body).as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, body: &str) -> RawItem {
        RawItem {
            source_id: "wire".to_string(),
            url: Some("https://example.org/a".to_string()),
            title: title.to_string(),
            body: body.to_string(),
            published_at: Utc::now(),
            reachable: true,
        }
    }

    #[test]
    fn rewrite_extends_without_erasing_original() {
        let mut item = ProcessedItem::from_raw(raw("Original", "Original body"));
        item.rewrite = Some(Rewrite {
            title: "New".to_string(),
            body: "New body".to_string(),
            views: BTreeMap::new(),
        });
        item.annotate(Annotation::new(
            StageName::Rewrite,
            AnnotationKind::Rewritten,
            "tightened",
        ));

        assert_eq!(item.original.title, "Original");
        assert_eq!(item.effective_title(), "New");
        assert_eq!(item.annotations.len(), 1);
    }

    #[test]
    fn first_failure_wins() {
        let mut item = ProcessedItem::from_raw(raw("t", "b"));
        item.mark_failed(StageName::Classify, "timeout");
        item.mark_failed(StageName::Rewrite, "rejected");

        let failure = item.failure.as_ref().unwrap();
        assert_eq!(failure.stage, StageName::Classify);
        assert_eq!(item.annotations.len(), 2);
        assert!(!item.is_usable());
    }

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let a = ProcessedItem::from_raw(raw("Hello  World", "Body\ntext"));
        let b = ProcessedItem::from_raw(raw("hello world", "body   TEXT"));
        let c = ProcessedItem::from_raw(raw("hello world", "other"));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn raw_item_defaults_to_reachable() {
        let json = r#"{"source_id":"s","title":"t","body":"b","published_at":"2024-01-01T00:00:00Z"}"#;
        let raw: RawItem = serde_json::from_str(json).unwrap();
        assert!(raw.reachable);
        assert!(raw.url.is_none());
    }
}
