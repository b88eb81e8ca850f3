use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use ureq::Agent;

use crate::error::{Error, Result};
use crate::model::FileRecord;

use super::{Classification, Classifier};

const PREVIEW_CHARS: usize = 2000;

/// Scorer backed by an Ollama-compatible `/api/generate` endpoint.
pub struct LlmClassifier {
    url: String,
    model: String,
    agent: Agent,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl LlmClassifier {
    /// `timeout` bounds each whole request, connect to last body byte.
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            agent,
        }
    }

    fn prompt(record: &FileRecord, content: &str) -> String {
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        let extension = record
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "Analyze this document and classify it. Return a JSON object with the keys \
             \"document_type\", \"confidence\" (0..1), \"categories\", \"tags\" and \"metadata\".\n\n\
             File name: {}\nFile type: {}\n\nDocument content:\n{}\n\nRespond only with valid JSON:",
            record.file_name(),
            extension,
            preview
        )
    }
}

impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    fn classify(&self, record: &FileRecord, content: &str) -> Result<Classification> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(record, content),
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 500,
            },
        };

        let response = self
            .agent
            .post(&self.url)
            .header("content-type", "application/json")
            .send_json(&request)
            .map_err(|e| Error::Classifier(format!("LLM request failed: {}", e)))?;

        let body: GenerateResponse = response
            .into_body()
            .read_json()
            .map_err(|e| Error::Classifier(format!("failed to parse LLM response: {}", e)))?;

        parse_classification(&body.response)
    }
}

/// Pull the first `{...}` object out of free-form model output.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_classification(text: &str) -> Result<Classification> {
    let json = extract_json_object(text)
        .ok_or_else(|| Error::Classifier("LLM response contained no JSON object".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::Classifier(format!("LLM returned invalid JSON: {}", e)))?;

    let category = value
        .get("document_type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            value
                .get("categories")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(Value::as_str)
        })
        .ok_or_else(|| Error::Classifier("LLM response named no category".to_string()))?;
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Classifier("LLM response had no confidence".to_string()))?;

    let mut classification = Classification::new(category.to_lowercase(), confidence);
    classification.tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(metadata) = value.get("metadata").filter(|m| m.is_object()) {
        classification.metadata = metadata.clone();
    }
    classification.customer = value
        .get("customer")
        .and_then(Value::as_str)
        .map(str::to_string);
    classification.project = value
        .get("project")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(classification)
}
