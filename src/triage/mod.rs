pub mod types;
pub mod error;
pub mod storage;
pub mod inventory;
pub mod service;
pub mod gemini;
pub mod merge;
pub mod enrichment;
pub mod worker;
pub mod engine;

// Re-export commonly used items
pub use types::{
    Category, Classification, EnrichmentState, MemoryPressure, ProcessId, ProcessRecord,
    RiskLevel, ScanMode, SystemStats, TriageConfig,
};
pub use error::TriageError;
pub use storage::{load_config, load_config_from, resolve_api_key, save_config_to};
pub use inventory::{InventorySource, MockInventory};
pub use service::{ClassificationService, LookupAnswer, ProcessLookup};
pub use gemini::GeminiClient;
pub use enrichment::ExpandOutcome;
pub use engine::{
    CleanReport, CleanRequest, EngineSnapshot, Notice, ScanState, ToggleOutcome, TriageEngine,
};
