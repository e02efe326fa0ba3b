//! The ordered check battery.
//!
//! Each check is independent and looks at one item plus the batch context. The
//! order of [`CHECKS`] is the order reason codes appear in a verdict.

use pressroom_core::{GateConfig, ProcessedItem};

use crate::reason::{CheckFamily, ReasonCode};

/// Batch-level facts a single item cannot know about itself.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub config: &'a GateConfig,
    /// An earlier accepted candidate has the same content fingerprint.
    pub duplicate: bool,
}

impl<'a> CheckContext<'a> {
    pub fn new(config: &'a GateConfig) -> Self {
        Self {
            config,
            duplicate: false,
        }
    }
}

pub struct Check {
    pub name: &'static str,
    pub family: CheckFamily,
    pub code: ReasonCode,
    /// Returns `true` when the item passes.
    pub eval: fn(&ProcessedItem, &CheckContext<'_>) -> bool,
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("code", &self.code)
            .finish()
    }
}

pub static CHECKS: &[Check] = &[
    // Required fields
    Check {
        name: "title_present",
        family: CheckFamily::RequiredField,
        code: ReasonCode::MissingTitle,
        eval: |item, _| !item.effective_title().trim().is_empty(),
    },
    Check {
        name: "body_present",
        family: CheckFamily::RequiredField,
        code: ReasonCode::MissingBody,
        eval: |item, _| !item.effective_body().trim().is_empty(),
    },
    Check {
        name: "source_present",
        family: CheckFamily::RequiredField,
        code: ReasonCode::MissingSource,
        eval: |item, _| !item.source.source_id.trim().is_empty(),
    },
    Check {
        name: "category_present",
        family: CheckFamily::RequiredField,
        code: ReasonCode::MissingCategory,
        eval: |item, _| item.category.as_deref().is_some_and(|c| !c.trim().is_empty()),
    },
    // Content quality
    Check {
        name: "body_min_length",
        family: CheckFamily::ContentQuality,
        code: ReasonCode::BodyTooShort,
        eval: |item, ctx| char_len(item.effective_body()) >= ctx.config.min_body_chars,
    },
    Check {
        name: "body_max_length",
        family: CheckFamily::ContentQuality,
        code: ReasonCode::BodyTooLong,
        eval: |item, ctx| char_len(item.effective_body()) <= ctx.config.max_body_chars,
    },
    Check {
        name: "no_placeholder",
        family: CheckFamily::ContentQuality,
        code: ReasonCode::PlaceholderText,
        eval: |item, _| {
            !has_placeholder(item.effective_title()) && !has_placeholder(item.effective_body())
        },
    },
    Check {
        name: "not_corrupted",
        family: CheckFamily::ContentQuality,
        code: ReasonCode::CorruptedText,
        eval: |item, _| !is_corrupted(item.effective_title()) && !is_corrupted(item.effective_body()),
    },
    Check {
        name: "coherent",
        family: CheckFamily::ContentQuality,
        code: ReasonCode::IncoherentText,
        eval: |item, _| is_coherent(item.effective_body()),
    },
    // Pipeline integrity
    Check {
        name: "upstream_succeeded",
        family: CheckFamily::PipelineIntegrity,
        code: ReasonCode::UpstreamFailed,
        eval: |item, _| item.is_usable(),
    },
    Check {
        name: "not_duplicate",
        family: CheckFamily::PipelineIntegrity,
        code: ReasonCode::DuplicateItem,
        eval: |_, ctx| !ctx.duplicate,
    },
    Check {
        name: "source_reachable",
        family: CheckFamily::PipelineIntegrity,
        code: ReasonCode::SourceUnreachable,
        eval: |item, _| item.source.reachable,
    },
    // Presentation completeness
    Check {
        name: "views_non_empty",
        family: CheckFamily::Presentation,
        code: ReasonCode::EmptyView,
        eval: |item, ctx| {
            ctx.config
                .declared_views
                .iter()
                .all(|name| item.view(name).is_some_and(|v| !v.trim().is_empty()))
        },
    },
    Check {
        name: "views_distinct",
        family: CheckFamily::Presentation,
        code: ReasonCode::DuplicateView,
        eval: |item, ctx| views_distinct(item, &ctx.config.declared_views),
    },
];

const PLACEHOLDERS: &[&str] = &[
    "lorem ipsum",
    "insert text here",
    "[placeholder]",
    "{{",
    "}}",
    "todo:",
    "tbd",
    "xxx",
];

const MOJIBAKE: &[&str] = &["Ã©", "Ã¨", "â€™", "â€œ", "â€", "Ã¢"];

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn has_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLACEHOLDERS.iter().any(|p| {
        if p.chars().all(char::is_alphanumeric) {
            // Whole-word markers only, so "tbd" does not match inside other words.
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *p)
        } else {
            lower.contains(p)
        }
    })
}

fn is_corrupted(text: &str) -> bool {
    text.contains('\u{FFFD}')
        || text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        || MOJIBAKE.iter().any(|m| text.contains(m))
}

/// Cheap coherence heuristic: enough words, mostly letters, no stuck repetition.
fn is_coherent(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 3 {
        return false;
    }

    let visible: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let letters = visible.iter().filter(|c| c.is_alphabetic()).count();
    if letters * 2 < visible.len() {
        return false;
    }

    let mut run = 1;
    for pair in words.windows(2) {
        if pair[0].eq_ignore_ascii_case(pair[1]) {
            run += 1;
            if run >= 4 {
                return false;
            }
        } else {
            run = 1;
        }
    }
    true
}

fn views_distinct(item: &ProcessedItem, declared: &[String]) -> bool {
    let present: Vec<String> = declared
        .iter()
        .filter_map(|name| item.view(name))
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    present
        .iter()
        .enumerate()
        .all(|(i, v)| !present[i + 1..].contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_matches_whole_words_only() {
        assert!(has_placeholder("Budget is TBD for now"));
        assert!(has_placeholder("Lorem ipsum dolor"));
        assert!(has_placeholder("Hello {{name}}"));
        assert!(!has_placeholder("The tbdx protocol"));
    }

    #[test]
    fn corruption_detects_replacement_and_mojibake() {
        assert!(is_corrupted("caf\u{FFFD}"));
        assert!(is_corrupted("itâ€™s"));
        assert!(is_corrupted("nul\u{0}byte"));
        assert!(!is_corrupted("plain text\nwith lines\tand tabs"));
    }

    #[test]
    fn coherence_rejects_noise() {
        assert!(is_coherent("The council approved the new budget on Tuesday."));
        assert!(!is_coherent("two words"));
        assert!(!is_coherent("buy buy buy buy now"));
        assert!(!is_coherent("1234 5678 9999 #### !!!!"));
    }

    #[test]
    fn check_names_are_unique() {
        let mut names: Vec<_> = CHECKS.iter().map(|c| c.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CHECKS.len());
    }
}
