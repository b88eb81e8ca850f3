use crate::config::KeywordRule;
use crate::error::Result;
use crate::model::FileRecord;

use super::{Classification, Classifier};

pub const UNSORTED: &str = "unsorted";

const FILENAME_WEIGHT: u32 = 2;
const CONTENT_WEIGHT: u32 = 1;

/// Rule-based scorer. A keyword in the file name counts twice, a keyword in
/// the content once; confidence is `1 - 0.5^hits` for the best rule.
pub struct KeywordClassifier {
    rules: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    pub fn from_rules(rules: &[KeywordRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|r| {
                    (
                        r.category.clone(),
                        r.keywords.iter().map(|k| k.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    fn score(keywords: &[String], file_name: &str, content: &str) -> (u32, Vec<String>) {
        let mut hits = 0;
        let mut matched = Vec::new();
        for keyword in keywords {
            let mut hit = false;
            if file_name.contains(keyword.as_str()) {
                hits += FILENAME_WEIGHT;
                hit = true;
            }
            if content.contains(keyword.as_str()) {
                hits += CONTENT_WEIGHT;
                hit = true;
            }
            if hit {
                matched.push(keyword.clone());
            }
        }
        (hits, matched)
    }
}

impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, record: &FileRecord, content: &str) -> Result<Classification> {
        let file_name = record.file_name().to_lowercase();
        let content = content.to_lowercase();

        let best = self
            .rules
            .iter()
            .map(|(category, keywords)| {
                let (hits, matched) = Self::score(keywords, &file_name, &content);
                (category, hits, matched)
            })
            .filter(|(_, hits, _)| *hits > 0)
            // First rule wins ties.
            .fold(None, |best: Option<(&String, u32, Vec<String>)>, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            });

        Ok(match best {
            Some((category, hits, matched)) => {
                let mut classification =
                    Classification::new(category.clone(), 1.0 - 0.5f64.powi(hits as i32));
                classification.tags = matched;
                classification.metadata = serde_json::json!({ "scorer": "keyword", "hits": hits });
                classification
            }
            None => Classification::new(UNSORTED, 0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fingerprint, IntakeOrder};
    use std::path::PathBuf;

    fn record(name: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/in").join(name),
            fingerprint: Fingerprint {
                hash: "00".repeat(32),
                size: 1,
            },
            scope: "ALLGEMEIN".to_string(),
            mtime: 0,
            intake: IntakeOrder { job: 1, position: 0 },
        }
    }

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::from_rules(&[
            KeywordRule::new("finanzen", &["invoice", "rechnung"]),
            KeywordRule::new("projekte", &["projekt"]),
        ])
    }

    #[test]
    fn test_filename_and_content_hit_is_confident() {
        let c = classifier()
            .classify(&record("Rechnung_2024.pdf"), "Rechnung Nr. 17")
            .unwrap();
        assert_eq!(c.category, "finanzen");
        assert!((c.confidence - 0.875).abs() < 1e-9);
        assert_eq!(c.tags, vec!["rechnung".to_string()]);
    }

    #[test]
    fn test_content_only_hit_is_uncertain() {
        let c = classifier().classify(&record("scan.pdf"), "see attached invoice").unwrap();
        assert_eq!(c.category, "finanzen");
        assert!((c.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_hits_is_unsorted() {
        let c = classifier().classify(&record("holiday.jpg"), "").unwrap();
        assert_eq!(c.category, UNSORTED);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_stronger_rule_wins() {
        let c = classifier()
            .classify(&record("projekt_plan.docx"), "invoice")
            .unwrap();
        assert_eq!(c.category, "projekte");
    }
}
