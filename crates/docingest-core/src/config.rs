use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    /// Root of the sorted tree; scopes live directly beneath it.
    pub sorted_root: PathBuf,
    pub staging_dir: PathBuf,
    pub retention_dir: PathBuf,
    pub feedback_path: PathBuf,
    pub internal_roots: Vec<String>,
    pub default_scope: String,
    pub ignore_patterns: Vec<String>,
    pub sorting: SortingConfig,
    pub classification: ClassificationConfig,
    pub pipeline: PipelineConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "docingest.db".to_string(),
            sorted_root: PathBuf::from("data/sorted"),
            staging_dir: PathBuf::from("data/staging"),
            retention_dir: PathBuf::from("data/retention"),
            feedback_path: PathBuf::from("data/classification_feedback.jsonl"),
            internal_roots: ["ORGA", "INFRA", "SALES", "HR"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_scope: "ALLGEMEIN".to_string(),
            ignore_patterns: Vec::new(),
            sorting: SortingConfig::default(),
            classification: ClassificationConfig::default(),
            pipeline: PipelineConfig::default(),
            retention: RetentionConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Config rooted at `base`, with every directory placed beneath it.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            database_path: base.join("docingest.db").to_string_lossy().into_owned(),
            sorted_root: base.join("sorted"),
            staging_dir: base.join("staging"),
            retention_dir: base.join("retention"),
            feedback_path: base.join("classification_feedback.jsonl"),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingConfig {
    pub enable_year_subfolders: bool,
    pub year_folders_under: Vec<String>,
    /// Lower-cased category -> subfolder below the scope directory.
    pub category_folders: BTreeMap<String, String>,
    pub fallback_folder: String,
}

impl Default for SortingConfig {
    fn default() -> Self {
        let category_folders = [
            ("finanzen", "Archiv"),
            ("projekte", "Projekte"),
            ("personal", "Archiv"),
            ("footage", "Projekte"),
            ("unsorted", "Allgemein"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            enable_year_subfolders: true,
            year_folders_under: vec!["Projekte".to_string(), "Archiv".to_string()],
            category_folders,
            fallback_folder: "Allgemein".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub confidence_threshold: f64,
    pub timeout_secs: u64,
    pub preview_bytes: usize,
    pub rules: Vec<KeywordRule>,
    pub llm: Option<LlmConfig>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            timeout_secs: 30,
            preview_bytes: 2000,
            rules: vec![
                KeywordRule::new("finanzen", &["invoice", "rechnung", "payment", "bill"]),
                KeywordRule::new("projekte", &["projekt", "project", "contract", "angebot"]),
                KeywordRule::new("personal", &["employee", "bewerbung", "gehalt"]),
            ],
            llm: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub category: String,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(category: &str, keywords: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enable_duplicate_detection: bool,
    pub enable_classification: bool,
    pub max_concurrent_workers: usize,
    pub batch_size: usize,
    /// A job fails once failed/total exceeds this ratio.
    pub max_failure_rate: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_duplicate_detection: true,
            enable_classification: true,
            max_concurrent_workers: 4,
            batch_size: 10,
            max_failure_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub window_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub api_key: Option<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            api_key: None,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `docingest_core=debug,info`.
    pub level: String,
    pub file_path: PathBuf,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: PathBuf::from("logs/docingest.log"),
            stdout: true,
        }
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("DOCINGEST").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}
