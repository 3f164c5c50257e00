use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::service::{
    BatchEntry, ClassificationEntry, ClassificationService, LookupAnswer, ProcessLookup,
};
use super::storage::resolve_api_key;
use super::types::{ScanMode, TriageConfig};

const SYSTEM_INSTRUCTION: &str = r#"You are an Expert Windows Systems Architect.
Analyze the provided list of running processes.
Identify which are critical system components (Kernel, Drivers) and which are user-space applications or potential bloatware.
Determine if they are safe to terminate to free up RAM.

CRITICAL RULES:
1. 'svchost.exe', 'System', 'Registry', 'smss.exe', 'csrss.exe', 'wininit.exe', 'services.exe', 'lsass.exe', 'explorer.exe' are ALWAYS Critical/High Risk. NEVER safe to kill.
2. Common browsers (chrome, firefox) are 'User' apps, safe to kill but will lose data.
3. Look for updaters (AdobeUpdater, JavaUpdate) as 'Bloatware'/'Background'.
4. Copy each input's "ref" number unchanged into its result.

Return a JSON array matching the schema."#;

/// Gemini generateContent client for batch classification and lookups
pub struct GeminiClient {
    api_url: String,
    api_key: Option<String>,
    quick_model: String,
    deep_model: String,
    deep_thinking_budget: u32,
    lookup_model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize)]
struct WebSource {
    uri: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }

    fn source_uris(&self) -> Vec<String> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| {
                g.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref()?.uri.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(config: &TriageConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: resolve_api_key(config),
            quick_model: config.quick_model.clone(),
            deep_model: config.deep_model.clone(),
            deep_thinking_budget: config.deep_thinking_budget,
            lookup_model: config.lookup_model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn generate(&self, model: &str, body: &Value) -> Result<GenerateContentResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Gemini API key not configured")?;

        let request_body = serde_json::to_string(body).context("Failed to serialize request")?;
        let url = format!("{}/models/{}:generateContent", self.api_url, model);

        log::debug!("Calling Gemini model {}", model);

        let response = ureq::post(&url)
            .set("Content-Type", "application/json")
            .set("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .send_string(&request_body)
            .context("Failed to call Gemini API")?;

        let response_text = response
            .into_string()
            .context("Failed to read Gemini response")?;
        serde_json::from_str(&response_text).context("Failed to parse Gemini response")
    }
}

impl ClassificationService for GeminiClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn classify(&self, batch: &[BatchEntry], mode: ScanMode) -> Result<Vec<ClassificationEntry>> {
        let model = match mode {
            ScanMode::Quick => &self.quick_model,
            ScanMode::Deep => &self.deep_model,
        };
        let thinking_budget = match mode {
            ScanMode::Quick => None,
            ScanMode::Deep => Some(self.deep_thinking_budget),
        };

        let body = build_classify_request(batch, thinking_budget)?;
        let response = self.generate(model, &body)?;
        let text = response.text().context("Gemini returned no text")?;

        parse_classification(&text)
    }
}

impl ProcessLookup for GeminiClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn lookup(&self, name: &str) -> Result<LookupAnswer> {
        let body = build_lookup_request(name);
        let response = self.generate(&self.lookup_model, &body)?;

        Ok(LookupAnswer {
            text: response.text(),
            sources: response.source_uris(),
        })
    }
}

fn response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "ref": { "type": "INTEGER" },
                "name": { "type": "STRING" },
                "description": { "type": "STRING" },
                "category": {
                    "type": "STRING",
                    "enum": ["System", "User", "Background", "Bloatware", "Unknown"]
                },
                "safeToKill": { "type": "BOOLEAN" },
                "riskLevel": {
                    "type": "STRING",
                    "enum": ["Low", "Medium", "High", "Critical"]
                },
                "reasoning": { "type": "STRING" }
            },
            "required": ["name", "description", "category", "safeToKill", "riskLevel"]
        }
    })
}

fn build_classify_request(batch: &[BatchEntry], thinking_budget: Option<u32>) -> Result<Value> {
    let list = serde_json::to_string(batch).context("Failed to serialize batch")?;

    let mut generation_config = json!({
        "responseMimeType": "application/json",
        "responseSchema": response_schema(),
    });
    if let Some(budget) = thinking_budget {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
    }

    Ok(json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("Analyze these processes: {}", list) }]
        }],
        "generationConfig": generation_config,
    }))
}

fn build_lookup_request(name: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{
                "text": format!(
                    "What is the Windows process \"{}\"? Is it safe to disable? Be concise.",
                    name
                )
            }]
        }],
        "tools": [{ "google_search": {} }],
    })
}

fn parse_classification(response: &str) -> Result<Vec<ClassificationEntry>> {
    let json_str = extract_json_array(response)?;
    let entries: Vec<ClassificationEntry> =
        serde_json::from_str(&json_str).context("Failed to parse classification array")?;

    if entries.is_empty() {
        anyhow::bail!("Classification response was empty");
    }
    Ok(entries)
}

fn extract_json_array(text: &str) -> Result<String> {
    let trimmed = text.trim();

    if trimmed.starts_with('[') {
        if let Some(end) = find_matching_bracket(trimmed) {
            return Ok(trimmed[..=end].to_string());
        }
    }

    // Markdown code block
    if let Some(start) = trimmed.find("```json") {
        let body = &trimmed[start + 7..];
        if let Some(end) = body.find("```") {
            return Ok(body[..end].trim().to_string());
        }
    }

    if let Some(start) = trimmed.find('[') {
        if let Some(end) = find_matching_bracket(&trimmed[start..]) {
            return Ok(trimmed[start..=start + end].to_string());
        }
    }

    anyhow::bail!("No JSON array found in response: {}", text)
}

/// Byte index of the `]` closing the array that opens `s`
fn find_matching_bracket(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::types::{Category, RiskLevel};

    const ENTRY: &str = r#"{"ref": 0, "name": "OneDrive.exe", "description": "Sync", "category": "Background", "safeToKill": true, "riskLevel": "Low"}"#;

    #[test]
    fn test_extract_json_direct() {
        let response = format!("[{}]", ENTRY);
        let result = extract_json_array(&response).unwrap();
        assert!(result.starts_with('['));
        assert!(result.ends_with(']'));
    }

    #[test]
    fn test_extract_json_from_code_block() {
        let response = format!("```json\n[{}]\n```", ENTRY);
        let entries = parse_classification(&response).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, Category::Background);
    }

    #[test]
    fn test_extract_json_with_text() {
        let response = format!("Here is the analysis:\n[{}]\nHope this helps!", ENTRY);
        let entries = parse_classification(&response).unwrap();
        assert_eq!(entries[0].slot, Some(0));
        assert_eq!(entries[0].risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_bracket_inside_string() {
        let s = r#"[{"name": "weird]name"}] trailing"#;
        assert_eq!(find_matching_bracket(s), Some(s.find("] trailing").unwrap()));
    }

    #[test]
    fn test_empty_array_is_failure() {
        assert!(parse_classification("[]").is_err());
    }

    #[test]
    fn test_malformed_payload_is_failure() {
        assert!(parse_classification("I cannot help with that").is_err());
        assert!(parse_classification(r#"[{"name": "x"}]"#).is_err());
    }

    #[test]
    fn test_classify_request_deep_has_thinking_budget() {
        let batch = vec![BatchEntry {
            slot: 0,
            name: "Teams.exe".to_string(),
            memory: "300MB".to_string(),
        }];
        let deep = build_classify_request(&batch, Some(16000)).unwrap();
        assert_eq!(
            deep["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            16000
        );
        let quick = build_classify_request(&batch, None).unwrap();
        assert!(quick["generationConfig"].get("thinkingConfig").is_none());

        let prompt = quick["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Teams.exe"));
        assert!(prompt.contains("\"ref\":0"));
    }

    #[test]
    fn test_lookup_request_uses_search_tool() {
        let body = build_lookup_request("YourPhone.exe");
        assert!(body["tools"][0].get("google_search").is_some());
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("YourPhone.exe"));
    }

    #[test]
    fn test_response_text_and_sources() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Phone Link "}, {"text": "companion."}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a.example"}},
                    {"retrievedContext": {}},
                    {"web": {"uri": "https://b.example"}}
                ]}
            }]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text().as_deref(), Some("Phone Link companion."));
        assert_eq!(
            response.source_uris(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_unconfigured_client_is_unavailable() {
        let config = TriageConfig {
            api_key: None,
            ..TriageConfig::default()
        };
        let client = GeminiClient {
            api_key: None,
            ..GeminiClient::new(&config)
        };
        assert!(!ClassificationService::is_available(&client));
        assert!(client.lookup("x.exe").is_err());
    }
}
