use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use super::error::TriageError;
use super::merge::ScanBatch;
use super::service::{ClassificationEntry, ClassificationService, ProcessLookup};
use super::types::ProcessId;

/// Message sent back when a classification call finishes
#[derive(Debug)]
pub struct ScanResult {
    pub batch: ScanBatch,
    pub outcome: Result<Vec<ClassificationEntry>, TriageError>,
}

/// Single-process lookup to run off the engine thread
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub id: ProcessId,
    pub name: String,
}

/// Message sent back when a lookup finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub id: ProcessId,
    /// Rendered text, or `None` when the lookup failed
    pub text: Option<String>,
}

/// Run one classification call on a background thread
pub fn spawn_scan(
    service: Arc<dyn ClassificationService>,
    batch: ScanBatch,
    result_tx: Sender<ScanResult>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        log::info!(
            "Classifying {} processes ({} scan)",
            batch.entries.len(),
            batch.mode
        );

        let outcome = match service.classify(&batch.entries, batch.mode) {
            Ok(entries) => {
                log::debug!("Classification returned {} entries", entries.len());
                Ok(entries)
            }
            Err(e) => {
                log::warn!("Classification failed: {:#}", e);
                Err(TriageError::classification(&e))
            }
        };

        if let Err(e) = result_tx.send(ScanResult { batch, outcome }) {
            log::error!("Failed to send scan result: {}", e);
        }
    })
}

/// Run one lookup on a background thread
pub fn spawn_lookup(
    lookup: Arc<dyn ProcessLookup>,
    request: LookupRequest,
    max_sources: usize,
    result_tx: Sender<LookupResult>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        log::debug!("Looking up process: {} ({})", request.name, request.id);

        let text = match lookup.lookup(&request.name) {
            Ok(answer) => Some(answer.render(max_sources)),
            Err(e) => {
                log::warn!("Lookup failed for {}: {:#}", request.name, e);
                None
            }
        };

        let result = LookupResult {
            id: request.id,
            text,
        };
        if let Err(e) = result_tx.send(result) {
            log::error!("Failed to send lookup result: {}", e);
        }
    })
}
