//! Contracts for the external classification and lookup capabilities.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::types::{Category, Classification, ProcessRecord, RiskLevel, ScanMode};

/// One process summary submitted for classification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchEntry {
    /// Position in the batch; the service is asked to echo it back
    #[serde(rename = "ref")]
    pub slot: usize,
    pub name: String,
    /// Human-readable memory figure, e.g. "120MB"
    pub memory: String,
}

impl BatchEntry {
    pub fn from_record(slot: usize, record: &ProcessRecord) -> Self {
        Self {
            slot,
            name: record.name.clone(),
            memory: format!("{}MB", record.memory_mb),
        }
    }
}

/// One classification returned by the service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationEntry {
    /// Echoed batch slot, when the service honoured it
    #[serde(rename = "ref", default)]
    pub slot: Option<usize>,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub safe_to_kill: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ClassificationEntry {
    pub fn to_classification(&self) -> Classification {
        Classification {
            category: self.category,
            safe_to_kill: Some(self.safe_to_kill),
            risk_level: Some(self.risk_level),
            description: Some(self.description.clone()),
            reasoning: self.reasoning.clone(),
        }
        .normalized()
    }
}

/// Free-form answer to a single-process lookup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupAnswer {
    pub text: Option<String>,
    /// Corroborating source links
    pub sources: Vec<String>,
}

impl LookupAnswer {
    /// Text stored on the record, with up to `max_sources` links appended
    pub fn render(&self, max_sources: usize) -> String {
        let mut text = match self.text.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => "No information found.".to_string(),
        };

        let sources: Vec<&str> = self
            .sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .take(max_sources)
            .collect();

        if !sources.is_empty() {
            text.push_str("\n\nSources:\n");
            text.push_str(&sources.join("\n"));
        }

        text
    }
}

/// Classifies a bounded batch of processes
pub trait ClassificationService: Send + Sync {
    /// Whether the service has the credentials it needs
    fn is_available(&self) -> bool;

    /// Classify the batch; the result may omit names and is unordered
    fn classify(&self, batch: &[BatchEntry], mode: ScanMode) -> Result<Vec<ClassificationEntry>>;
}

/// Looks up descriptive text for one process name
pub trait ProcessLookup: Send + Sync {
    fn is_available(&self) -> bool;

    fn lookup(&self, name: &str) -> Result<LookupAnswer>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::types::ProcessId;

    #[test]
    fn test_batch_entry_wire_format() {
        let record = ProcessRecord::new(ProcessId(3), "Teams.exe", 4000, 250, 0.0);
        let entry = BatchEntry::from_record(2, &record);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"ref":2,"name":"Teams.exe","memory":"250MB"}"#);
    }

    #[test]
    fn test_entry_without_ref_or_reasoning() {
        let json = r#"{"name":"OneDrive.exe","description":"Sync client","category":"Background","safeToKill":true,"riskLevel":"Low"}"#;
        let entry: ClassificationEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.slot, None);
        assert_eq!(entry.reasoning, None);
        assert_eq!(entry.category, Category::Background);
    }

    #[test]
    fn test_entry_rejects_unknown_category() {
        let json = r#"{"name":"x","description":"d","category":"Gadget","safeToKill":true,"riskLevel":"Low"}"#;
        assert!(serde_json::from_str::<ClassificationEntry>(json).is_err());
    }

    #[test]
    fn test_render_appends_limited_sources() {
        let answer = LookupAnswer {
            text: Some("Updater for Adobe products.".to_string()),
            sources: vec![
                "https://a.example".to_string(),
                "".to_string(),
                "https://b.example".to_string(),
                "https://c.example".to_string(),
            ],
        };
        assert_eq!(
            answer.render(2),
            "Updater for Adobe products.\n\nSources:\nhttps://a.example\nhttps://b.example"
        );
    }

    #[test]
    fn test_render_without_text() {
        assert_eq!(LookupAnswer::default().render(2), "No information found.");
    }
}
