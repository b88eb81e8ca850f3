use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Customer folders look like `12345_Acme GmbH`.
fn customer_folder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4,6})_([\w\- ]+)").expect("valid customer folder regex")
    })
}

/// Scope key of a file: the customer folder found in its parent directory,
/// else the first internal root mentioned anywhere in the path, else `default`.
pub fn detect_scope(path: &Path, internal_roots: &[String], default: &str) -> String {
    if let Some(parent) = path.parent() {
        let parent = parent.to_string_lossy();
        if let Some(m) = customer_folder_pattern().find(&parent) {
            return m.as_str().trim_end().to_string();
        }
    }

    let lower = path.to_string_lossy().to_lowercase();
    internal_roots
        .iter()
        .find(|root| lower.contains(&root.to_lowercase()))
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> Vec<String> {
        vec!["ORGA".to_string(), "HR".to_string()]
    }

    #[test]
    fn test_customer_folder_wins() {
        let scope = detect_scope(
            Path::new("/shares/kunden/10042_Acme GmbH/2023/rechnung.pdf"),
            &roots(),
            "ALLGEMEIN",
        );
        assert_eq!(scope, "10042_Acme GmbH");
    }

    #[test]
    fn test_internal_root_matches_case_insensitively() {
        let scope = detect_scope(Path::new("/shares/orga/policies/travel.docx"), &roots(), "ALLGEMEIN");
        assert_eq!(scope, "ORGA");
    }

    #[test]
    fn test_default_scope() {
        let scope = detect_scope(Path::new("/tmp/upload/scan.pdf"), &roots(), "ALLGEMEIN");
        assert_eq!(scope, "ALLGEMEIN");
    }
}
