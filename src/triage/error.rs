use thiserror::Error;

use super::types::ProcessId;

/// Errors surfaced to the presentation layer by engine intents
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriageError {
    /// No API key configured; raised before any network attempt
    #[error("no API key configured (set API_KEY or add api_key to the config file)")]
    Configuration,

    /// A classification call is already in flight
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// The batch call failed or returned unusable data
    #[error("classification failed: {0}")]
    Classification(String),

    /// The inventory source produced the same id twice
    #[error("duplicate process id {0} in inventory")]
    DuplicateId(ProcessId),
}

impl TriageError {
    /// Collapse a service-boundary error into a classification failure
    pub fn classification(err: &anyhow::Error) -> Self {
        Self::Classification(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("Failed to call Gemini API");
        let triage = TriageError::classification(&err);
        assert_eq!(
            triage.to_string(),
            "classification failed: Failed to call Gemini API: connection refused"
        );
    }
}
