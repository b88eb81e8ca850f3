use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::FileRecord;

use super::{Classification, Classifier};

/// Runs every member and keeps the most confident answer. Member errors are
/// skipped; the ensemble fails only when all members fail.
pub struct EnsembleClassifier {
    members: Vec<Arc<dyn Classifier>>,
}

impl EnsembleClassifier {
    pub fn new(members: Vec<Arc<dyn Classifier>>) -> Self {
        Self { members }
    }
}

impl Classifier for EnsembleClassifier {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn classify(&self, record: &FileRecord, content: &str) -> Result<Classification> {
        let mut best: Option<Classification> = None;
        let mut errors = Vec::new();

        for member in &self.members {
            match member.classify(record, content) {
                Ok(c) => {
                    debug!("{} scored {} at {:.2}", member.name(), c.category, c.confidence);
                    if best.as_ref().map_or(true, |b| c.confidence > b.confidence) {
                        best = Some(c);
                    }
                }
                Err(e) => errors.push(format!("{}: {}", member.name(), e)),
            }
        }

        best.ok_or_else(|| Error::Classifier(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FixedClassifier;
    use crate::model::{Fingerprint, IntakeOrder};
    use std::path::PathBuf;
    use std::time::Duration;

    fn record() -> FileRecord {
        FileRecord {
            path: PathBuf::from("/in/a.pdf"),
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
    fn test_highest_confidence_wins_and_errors_are_skipped() {
        let ensemble = EnsembleClassifier::new(vec![
            Arc::new(FixedClassifier::returning("finanzen", 0.5)),
            Arc::new(FixedClassifier {
                answer: Err(Error::Classifier("down".to_string())),
                delay: Duration::ZERO,
            }),
            Arc::new(FixedClassifier::returning("projekte", 0.9)),
        ]);
        let c = ensemble.classify(&record(), "").unwrap();
        assert_eq!(c.category, "projekte");
    }

    #[test]
    fn test_all_members_failing_is_an_error() {
        let ensemble = EnsembleClassifier::new(vec![Arc::new(FixedClassifier {
            answer: Err(Error::Classifier("down".to_string())),
            delay: Duration::ZERO,
        })]);
        assert!(ensemble.classify(&record(), "").is_err());
    }
}
