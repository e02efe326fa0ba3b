//! Deterministic, lowest-common-denominator collaborators.
//!
//! Used only when every configured provider for a role is unavailable. They
//! make no external calls and always produce the same output for the same
//! input.

use std::collections::BTreeMap;

use async_trait::async_trait;

use pressroom_core::{ProcessedItem, TextSpan};
use pressroom_resilience::ProviderError;

use crate::collaborators::{
    AssembledEntry, AssembledOutput, Assembler, ChangeNote, Classification, Classifier,
    RewriteOutput, Rewriter, Section,
};

const DEFAULT_CATEGORY: &str = "general";

const KEYWORDS: &[(&str, &[&str])] = &[
    ("business", &["market", "shares", "earnings", "company", "economy", "bank"]),
    ("politics", &["election", "council", "minister", "parliament", "senate", "vote"]),
    ("science", &["research", "study", "scientists", "climate", "space", "university"]),
    ("sports", &["match", "league", "season", "coach", "tournament", "championship"]),
    ("technology", &["software", "startup", "device", "internet", "chip", "data"]),
];

/// Picks the category whose keywords occur most often; ties go to the first in table order.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn category_for(&self, text: &str) -> &'static str {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut best = (DEFAULT_CATEGORY, 0usize);
        for (category, keywords) in KEYWORDS {
            let hits = words.iter().filter(|w| keywords.contains(*w)).count();
            if hits > best.1 {
                best = (*category, hits);
            }
        }
        best.0
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, item: &ProcessedItem) -> Result<Classification, ProviderError> {
        let text = format!("{} {}", item.original.title, item.original.body);
        Ok(Classification {
            category: self.category_for(&text).to_string(),
            confidence: 0.0,
        })
    }
}

/// Whitespace-normalizes the original and cuts views out of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveRewriter;

const HEADLINE_CHARS: usize = 80;
const SUMMARY_CHARS: usize = 200;

impl ExtractiveRewriter {
    fn view(&self, name: &str, title: &str, body: &str) -> String {
        match name {
            "headline" => truncate(title, HEADLINE_CHARS),
            "summary" => truncate(first_sentence(body), SUMMARY_CHARS),
            _ => truncate(body, SUMMARY_CHARS),
        }
    }
}

#[async_trait]
impl Rewriter for ExtractiveRewriter {
    async fn rewrite(
        &self,
        item: &ProcessedItem,
        views: &[String],
    ) -> Result<RewriteOutput, ProviderError> {
        let title = collapse_whitespace(&item.original.title);
        let body = collapse_whitespace(&item.original.body);

        let views: BTreeMap<String, String> = views
            .iter()
            .map(|name| (name.clone(), self.view(name, &title, &body)))
            .collect();

        let mut changes = Vec::new();
        if body != item.original.body {
            changes.push(ChangeNote {
                note: "collapsed whitespace".to_string(),
                span: Some(TextSpan {
                    start: 0,
                    end: item.original.body.len(),
                }),
            });
        }

        Ok(RewriteOutput {
            title,
            body,
            views,
            changes,
        })
    }
}

/// One section per category in name order; entries keep the given (recency) order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryAssembler;

#[async_trait]
impl Assembler for CategoryAssembler {
    async fn assemble(&self, items: &[ProcessedItem]) -> Result<AssembledOutput, ProviderError> {
        let mut sections: BTreeMap<String, Vec<AssembledEntry>> = BTreeMap::new();
        for item in items {
            let category = item
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            sections.entry(category).or_default().push(AssembledEntry {
                item_id: item.id,
                source_id: item.source.source_id.clone(),
                title: item.effective_title().to_string(),
                summary: item.view("summary").map(str::to_string),
                published_at: item.published_at,
            });
        }

        Ok(AssembledOutput {
            sections: sections
                .into_iter()
                .map(|(category, entries)| Section { category, entries })
                .collect(),
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_sentence(text: &str) -> &str {
    match text.find(['.', '!', '?']) {
        Some(end) => &text[..=end],
        None => text,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}
