//! Inventory sources.
//!
//! The engine takes its process list from an [`InventorySource`] once, at
//! session start. [`MockInventory`] stands in for a native collector and
//! produces a plausible Windows process table.

use std::collections::HashSet;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::TriageError;
use super::types::{Category, Classification, ProcessId, ProcessRecord, RiskLevel};

/// Supplies the initial ordered process list
pub trait InventorySource {
    fn collect(&mut self) -> Result<Vec<ProcessRecord>>;
}

const SYSTEM_PROCESSES: &[&str] = &[
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
    "spoolsv.exe",
    "RuntimeBroker.exe",
];

const USER_APPS: &[&str] = &[
    "chrome.exe",
    "spotify.exe",
    "discord.exe",
    "code.exe",
    "steam.exe",
    "slack.exe",
    "obs64.exe",
    "firefox.exe",
    "msedge.exe",
];

const BLOATWARE_CANDIDATES: &[&str] = &[
    "AdobeUpdateService.exe",
    "GoogleCrashHandler.exe",
    "OneDrive.exe",
    "Cortana.exe",
    "YourPhone.exe",
    "GameBar.exe",
    "SkypeApp.exe",
    "Teams.exe",
    "DropboxUpdate.exe",
];

/// Chance that each bloatware candidate is running
const BLOATWARE_PRESENCE: f64 = 0.7;

/// Randomized process table with a fixed shape
pub struct MockInventory {
    rng: StdRng,
    next_id: u64,
}

impl MockInventory {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            next_id: 1,
        }
    }

    /// Deterministic inventory for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        id
    }

    fn system_process(&mut self, name: &str) -> ProcessRecord {
        let id = self.allocate_id();
        let pid = self.rng.random_range(100..5100);
        let memory_mb = if name == "svchost.exe" {
            self.rng.random_range(50..850)
        } else {
            self.rng.random_range(10..210)
        };
        let cpu = self.rng.random_range(0.0..2.0);

        ProcessRecord::new(id, name, pid, memory_mb, cpu).with_classification(Classification {
            category: Category::System,
            safe_to_kill: Some(false),
            risk_level: Some(RiskLevel::Critical),
            description: Some("Windows System Process".to_string()),
            reasoning: None,
        })
    }

    fn user_process(&mut self, name: &str) -> ProcessRecord {
        let id = self.allocate_id();
        let pid = self.rng.random_range(5000..25000);
        let memory_mb = self.rng.random_range(100..1600);
        let cpu = self.rng.random_range(0.0..15.0);
        ProcessRecord::new(id, name, pid, memory_mb, cpu)
    }

    fn background_process(&mut self, name: &str) -> ProcessRecord {
        let id = self.allocate_id();
        let pid = self.rng.random_range(5000..25000);
        let memory_mb = self.rng.random_range(20..320);
        ProcessRecord::new(id, name, pid, memory_mb, 0.0)
    }
}

impl Default for MockInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl InventorySource for MockInventory {
    fn collect(&mut self) -> Result<Vec<ProcessRecord>> {
        let mut records = Vec::new();

        for name in SYSTEM_PROCESSES {
            records.push(self.system_process(name));
        }

        for name in USER_APPS {
            // Browsers run several renderer processes
            let instances = if name.contains("chrome") || name.contains("edge") {
                self.rng.random_range(2..8)
            } else {
                1
            };
            for _ in 0..instances {
                records.push(self.user_process(name));
            }
        }

        for name in BLOATWARE_CANDIDATES {
            if self.rng.random_bool(BLOATWARE_PRESENCE) {
                records.push(self.background_process(name));
            }
        }

        records.sort_by(|a, b| b.memory_mb.cmp(&a.memory_mb));

        log::debug!("Mock inventory generated {} processes", records.len());
        Ok(records)
    }
}

/// Reject inventories that reuse an id
pub fn check_unique_ids(records: &[ProcessRecord]) -> Result<(), TriageError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id) {
            return Err(TriageError::DuplicateId(record.id));
        }
    }
    Ok(())
}
