//! Confidence-scored document classification.
//!
//! Scorers only ever read; filing decisions are taken by the caller by
//! comparing [`Classification::confidence`] to the configured threshold.

pub mod ensemble;
pub mod keyword;
pub mod llm;

pub use ensemble::EnsembleClassifier;
pub use keyword::KeywordClassifier;
pub use llm::LlmClassifier;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::config::ClassificationConfig;
use crate::error::{Error, Result};
use crate::model::FileRecord;

pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub customer: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Classification {
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence: confidence.clamp(0.0, 1.0),
            customer: None,
            project: None,
            tags: Vec::new(),
            metadata: json!({}),
        }
    }

    /// Result used when no scorer produced an answer. Always goes to review.
    pub fn unclassified(reason: impl Into<String>) -> Self {
        Self {
            metadata: json!({ "reason": reason.into() }),
            ..Self::new(UNCLASSIFIED, 0.0)
        }
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.category != UNCLASSIFIED && self.confidence >= threshold
    }
}

pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// `content` is a text preview of the file, possibly empty.
    fn classify(&self, record: &FileRecord, content: &str) -> Result<Classification>;
}

/// Run `classifier` on a helper thread and wait at most `timeout`.
/// Errors and timeouts degrade to [`Classification::unclassified`].
pub fn classify_with_timeout(
    classifier: &Arc<dyn Classifier>,
    record: &FileRecord,
    content: String,
    timeout: Duration,
) -> Classification {
    let (tx, rx) = mpsc::channel();
    let scorer = Arc::clone(classifier);
    let owned_record = record.clone();
    let spawned = thread::Builder::new()
        .name("classifier".to_string())
        .spawn(move || {
            let _ = tx.send(scorer.classify(&owned_record, &content));
        });
    if let Err(e) = spawned {
        warn!("Could not start classifier thread: {}", e);
        return Classification::unclassified(format!("classifier unavailable: {}", e));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(classification)) => classification,
        Ok(Err(e)) => {
            warn!(
                "Classifier {} failed on {}: {}",
                classifier.name(),
                record.path.display(),
                e
            );
            Classification::unclassified(e.to_string())
        }
        Err(_) => {
            let e = Error::ClassificationTimeout(timeout.as_secs());
            warn!("{} for {}", e, record.path.display());
            Classification::unclassified(e.to_string())
        }
    }
}

/// Keyword rules, plus the LLM scorer when an endpoint is configured.
pub fn from_config(config: &ClassificationConfig) -> Arc<dyn Classifier> {
    let keyword: Arc<dyn Classifier> = Arc::new(KeywordClassifier::from_rules(&config.rules));
    match &config.llm {
        Some(llm) => Arc::new(EnsembleClassifier::new(vec![
            keyword,
            Arc::new(LlmClassifier::new(
                &llm.endpoint,
                &llm.model,
                Duration::from_secs(config.timeout_secs),
            )),
        ])),
        None => keyword,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FixedClassifier;
    use super::*;
    use crate::model::{Fingerprint, IntakeOrder};
    use std::path::PathBuf;

    fn record() -> FileRecord {
        FileRecord {
            path: PathBuf::from("/in/scan.pdf"),
            fingerprint: Fingerprint {
                hash: "00".repeat(32),
                size: 1,
            },
            scope: "ALLGEMEIN".to_string(),
            mtime: 0,
            intake: IntakeOrder { job: 1, position: 0 },
        }
    }

    #[test]
    fn test_timeout_degrades_to_unclassified() {
        let slow: Arc<dyn Classifier> = Arc::new(FixedClassifier {
            answer: Ok(Classification::new("finanzen", 0.99)),
            delay: Duration::from_millis(500),
        });
        let result = classify_with_timeout(&slow, &record(), String::new(), Duration::from_millis(20));
        assert_eq!(result.category, UNCLASSIFIED);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_confident(0.0));
        assert!(result.metadata["reason"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn test_error_degrades_to_unclassified() {
        let failing: Arc<dyn Classifier> = Arc::new(FixedClassifier {
            answer: Err(Error::Classifier("model offline".to_string())),
            delay: Duration::ZERO,
        });
        let result = classify_with_timeout(&failing, &record(), String::new(), Duration::from_secs(1));
        assert_eq!(result.category, UNCLASSIFIED);
        assert!(result.metadata["reason"].as_str().unwrap().contains("model offline"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(Classification::new("finanzen", 0.85).is_confident(0.85));
        assert!(!Classification::new("finanzen", 0.6).is_confident(0.85));
    }
}
