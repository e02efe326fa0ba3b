//! Stable reason codes.
//!
//! These strings are part of the external surface (job diagnostics, HTTP
//! responses); never rename one.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingTitle,
    MissingBody,
    MissingSource,
    MissingCategory,
    BodyTooShort,
    BodyTooLong,
    PlaceholderText,
    CorruptedText,
    IncoherentText,
    UpstreamFailed,
    DuplicateItem,
    SourceUnreachable,
    EmptyView,
    DuplicateView,
    /// Rejected by the per-(source, category) cap, not by any item check.
    DiversityCapExceeded,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MissingTitle => "MISSING_TITLE",
            ReasonCode::MissingBody => "MISSING_BODY",
            ReasonCode::MissingSource => "MISSING_SOURCE",
            ReasonCode::MissingCategory => "MISSING_CATEGORY",
            ReasonCode::BodyTooShort => "BODY_TOO_SHORT",
            ReasonCode::BodyTooLong => "BODY_TOO_LONG",
            ReasonCode::PlaceholderText => "PLACEHOLDER_TEXT",
            ReasonCode::CorruptedText => "CORRUPTED_TEXT",
            ReasonCode::IncoherentText => "INCOHERENT_TEXT",
            ReasonCode::UpstreamFailed => "UPSTREAM_FAILED",
            ReasonCode::DuplicateItem => "DUPLICATE_ITEM",
            ReasonCode::SourceUnreachable => "SOURCE_UNREACHABLE",
            ReasonCode::EmptyView => "EMPTY_VIEW",
            ReasonCode::DuplicateView => "DUPLICATE_VIEW",
            ReasonCode::DiversityCapExceeded => "DIVERSITY_CAP_EXCEEDED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFamily {
    RequiredField,
    ContentQuality,
    PipelineIntegrity,
    Presentation,
}
