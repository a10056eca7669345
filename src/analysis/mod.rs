//! Code analysis
//!
//! An `Analyzer` turns the current solution into review commentary. The remote
//! chat-completion client and the offline rule table both implement it, and
//! both funnel their text through the line reference extractor.

pub mod client;
pub mod prompts;

use crate::extract::extract_line_numbers;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

pub use client::ChatClient;

/// What gets sent for analysis. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub code: String,
    pub problem_id: String,
}

/// Commentary plus the lines it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub narrative: String,
    pub line_numbers: BTreeSet<u32>,
}

impl AnalysisResult {
    pub fn from_narrative(narrative: impl Into<String>) -> Self {
        let narrative = narrative.into();
        let line_numbers = extract_line_numbers(&narrative);
        Self {
            narrative,
            line_numbers,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// No credential or unusable settings; retrying won't help until the
    /// configuration changes.
    #[error("{0}")]
    Configuration(String),
    /// Non-success status or transport failure from the analysis service.
    #[error("{message}")]
    Service { status: Option<u16>, message: String },
}

impl AnalysisError {
    pub fn service(message: impl Into<String>) -> Self {
        AnalysisError::Service {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, AnalysisError::Configuration(_))
    }
}

pub trait Analyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> BoxFuture<'a, Result<AnalysisResult, AnalysisError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_narrative() {
        let result = AnalysisResult::from_narrative("Line 3: shadowed variable. See also (line 1).");
        assert_eq!(result.line_numbers.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_error_persistence() {
        assert!(AnalysisError::Configuration("no key".into()).is_persistent());
        assert!(!AnalysisError::service("boom").is_persistent());
        assert_eq!(AnalysisError::service("boom").to_string(), "boom");
    }
}
