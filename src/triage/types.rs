use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier assigned when the inventory is materialized
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Category assigned by classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Category {
    System,
    User,
    Background,
    Bloatware,
    Unknown,
}

impl Category {
    /// Categories eligible for automatic selection after a scan
    pub fn is_auto_selectable(self) -> bool {
        matches!(self, Self::Bloatware | Self::Background)
    }
}

/// Risk of terminating a process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Which classification profile a scan uses
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum ScanMode {
    /// Fast path
    #[default]
    Quick,
    /// Exhaustive reasoning pass with a larger latency budget
    Deep,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => f.write_str("quick"),
            Self::Deep => f.write_str("deep"),
        }
    }
}

/// The authoritative classification of a record. Always written as a whole.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub category: Category,
    /// `None` means the safety of terminating is unknown
    pub safe_to_kill: Option<bool>,
    /// `None` means the risk is unknown
    pub risk_level: Option<RiskLevel>,
    pub description: Option<String>,
    pub reasoning: Option<String>,
}

impl Classification {
    /// Classification given to batch records the service did not answer for
    pub fn unanalyzed() -> Self {
        Self {
            category: Category::Unknown,
            safe_to_kill: Some(false),
            risk_level: None,
            description: None,
            reasoning: None,
        }
    }

    /// Classification forced onto names from the local safety list
    pub fn protected(description: Option<String>) -> Self {
        Self {
            category: Category::System,
            safe_to_kill: Some(false),
            risk_level: Some(RiskLevel::Critical),
            description,
            reasoning: Some("Protected by the local safety list".to_string()),
        }
    }

    /// Critical processes are never safe to kill, whatever the service said
    pub fn normalized(mut self) -> Self {
        if self.risk_level == Some(RiskLevel::Critical) {
            self.safe_to_kill = Some(false);
        }
        self
    }

    pub fn is_critical(&self) -> bool {
        self.risk_level == Some(RiskLevel::Critical)
    }

    /// Whether a scan should select this record automatically
    pub fn is_recommended_kill(&self) -> bool {
        self.safe_to_kill == Some(true) && self.category.is_auto_selectable() && !self.is_critical()
    }
}

/// Progress of the lazy per-record description lookup
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum EnrichmentState {
    #[default]
    NotAttempted,
    Pending,
    Done(String),
    Failed,
}

/// Text shown for a record whose lookup failed
pub const DETAILS_UNAVAILABLE: &str = "details unavailable";

impl EnrichmentState {
    /// Text to display for this state, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Done(text) => Some(text),
            Self::Failed => Some(DETAILS_UNAVAILABLE),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// One observed process
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub id: ProcessId,
    /// Image name; several records may share it
    pub name: String,
    /// Informational only, never used as identity
    pub pid: u32,
    pub memory_mb: u64,
    pub cpu_percent: f32,
    pub classification: Option<Classification>,
    #[serde(default)]
    pub enrichment: EnrichmentState,
}

impl ProcessRecord {
    pub fn new(id: ProcessId, name: &str, pid: u32, memory_mb: u64, cpu_percent: f32) -> Self {
        Self {
            id,
            name: name.to_string(),
            pid,
            memory_mb,
            cpu_percent: cpu_percent.max(0.0),
            classification: None,
            enrichment: EnrichmentState::NotAttempted,
        }
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification.normalized());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.classification
            .as_ref()
            .is_some_and(Classification::is_critical)
    }

    pub fn description(&self) -> Option<&str> {
        self.classification
            .as_ref()
            .and_then(|c| c.description.as_deref())
    }
}

/// Memory pressure band, following the gauge thresholds
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryPressure {
    Normal,
    Elevated,
    Critical,
}

/// Aggregate memory figures, always derived from the inventory
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SystemStats {
    pub total_memory_gb: f64,
    pub used_memory_gb: f64,
    pub used_percent: f64,
    pub process_count: usize,
}

impl SystemStats {
    pub fn from_records(records: &[ProcessRecord], total_memory_gb: f64) -> Self {
        let used_mb: u64 = records.iter().map(|r| r.memory_mb).sum();
        let used_memory_gb = used_mb as f64 / 1024.0;
        let used_percent = if total_memory_gb > 0.0 {
            used_memory_gb / total_memory_gb * 100.0
        } else {
            0.0
        };

        Self {
            total_memory_gb,
            used_memory_gb,
            used_percent,
            process_count: records.len(),
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        if self.used_percent > 85.0 {
            MemoryPressure::Critical
        } else if self.used_percent > 60.0 {
            MemoryPressure::Elevated
        } else {
            MemoryPressure::Normal
        }
    }
}

/// Engine configuration, persisted as JSON
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Version for migration purposes
    pub version: u32,
    /// Number of leading inventory records submitted per scan
    pub batch_ceiling: usize,
    /// Physical memory capacity used for the usage percentage
    pub total_memory_gb: f64,
    /// Gemini API key; environment variables take precedence
    pub api_key: Option<String>,
    pub api_url: String,
    pub quick_model: String,
    pub deep_model: String,
    /// Thinking token budget for deep scans
    pub deep_thinking_budget: u32,
    pub lookup_model: String,
    pub request_timeout_secs: u64,
    /// Source links appended to a lookup answer
    pub max_sources: usize,
    /// Names that are always Critical regardless of classification
    pub protected_processes: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            version: 1,
            batch_ceiling: 15,
            total_memory_gb: 32.0,
            api_key: None,
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            quick_model: "gemini-2.5-flash".to_string(),
            deep_model: "gemini-3-pro-preview".to_string(),
            deep_thinking_budget: 16000,
            lookup_model: "gemini-2.5-flash".to_string(),
            request_timeout_secs: 60,
            max_sources: 2,
            protected_processes: [
                "svchost.exe",
                "System",
                "Registry",
                "smss.exe",
                "csrss.exe",
                "wininit.exe",
                "services.exe",
                "lsass.exe",
                "explorer.exe",
                "Memory Compression",
                "Taskmgr.exe",
                "spoolsv.exe",
                "RuntimeBroker.exe",
                "winlogon.exe",
                "fontdrvhost.exe",
                "dwm.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl TriageConfig {
    pub fn model_for(&self, mode: ScanMode) -> &str {
        match mode {
            ScanMode::Quick => &self.quick_model,
            ScanMode::Deep => &self.deep_model,
        }
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected_processes.iter().any(|p| p == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, mem: u64) -> ProcessRecord {
        ProcessRecord::new(ProcessId(id), "test.exe", 100, mem, 0.0)
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId(7).to_string(), "proc-7");
    }

    #[test]
    fn test_critical_is_never_safe() {
        let c = Classification {
            category: Category::Bloatware,
            safe_to_kill: Some(true),
            risk_level: Some(RiskLevel::Critical),
            description: None,
            reasoning: None,
        }
        .normalized();
        assert_eq!(c.safe_to_kill, Some(false));
        assert!(!c.is_recommended_kill());
    }

    #[test]
    fn test_recommended_kill_requires_category() {
        let mut c = Classification {
            category: Category::User,
            safe_to_kill: Some(true),
            risk_level: Some(RiskLevel::Low),
            description: None,
            reasoning: None,
        };
        assert!(!c.is_recommended_kill());
        c.category = Category::Background;
        assert!(c.is_recommended_kill());
    }

    #[test]
    fn test_stats_from_records() {
        let records = vec![record(1, 1024), record(2, 2048)];
        let stats = SystemStats::from_records(&records, 32.0);
        assert_eq!(stats.process_count, 2);
        assert!((stats.used_memory_gb - 3.0).abs() < f64::EPSILON);
        assert!((stats.used_percent - 9.375).abs() < 1e-9);
        assert_eq!(stats.pressure(), MemoryPressure::Normal);
    }

    #[test]
    fn test_stats_pressure_bands() {
        let elevated = SystemStats::from_records(&[record(1, 20 * 1024)], 32.0);
        assert_eq!(elevated.pressure(), MemoryPressure::Elevated);
        let critical = SystemStats::from_records(&[record(1, 30 * 1024)], 32.0);
        assert_eq!(critical.pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn test_enrichment_text() {
        assert_eq!(EnrichmentState::Failed.text(), Some(DETAILS_UNAVAILABLE));
        assert_eq!(EnrichmentState::Pending.text(), None);
        assert_eq!(EnrichmentState::Done("x".into()).text(), Some("x"));
    }

    #[test]
    fn test_config_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.batch_ceiling, 15);
        assert_eq!(config.model_for(ScanMode::Deep), "gemini-3-pro-preview");
        assert!(config.is_protected("lsass.exe"));
        assert!(!config.is_protected("chrome.exe"));
    }
}
