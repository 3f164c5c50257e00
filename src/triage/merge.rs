//! Batch splitting and reconciliation of classification results.
//!
//! Only the first `batch_ceiling` records are submitted. Results are joined
//! back by echoed slot first and by name second, planned in full, and only
//! then written, so a failed scan never touches a record.

use std::collections::{BTreeSet, HashMap};

use super::error::TriageError;
use super::service::{BatchEntry, ClassificationEntry};
use super::types::{Classification, ProcessId, ProcessRecord, ScanMode, TriageConfig};

/// The analyzable prefix of the inventory, frozen when a scan starts
#[derive(Clone, Debug, PartialEq)]
pub struct ScanBatch {
    pub mode: ScanMode,
    /// Record ids, indexed by slot
    pub ids: Vec<ProcessId>,
    pub entries: Vec<BatchEntry>,
}

impl ScanBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Take the first `ceiling` records; the rest pass through untouched
pub fn split_batch(records: &[ProcessRecord], ceiling: usize, mode: ScanMode) -> ScanBatch {
    let analyzable = &records[..ceiling.min(records.len())];

    ScanBatch {
        mode,
        ids: analyzable.iter().map(|r| r.id).collect(),
        entries: analyzable
            .iter()
            .enumerate()
            .map(|(slot, r)| BatchEntry::from_record(slot, r))
            .collect(),
    }
}

/// Every classification a scan will write, computed before any write
#[derive(Clone, Debug, PartialEq)]
pub struct MergePlan {
    pub assignments: Vec<(ProcessId, Classification)>,
    /// Batch records the service answered for
    pub matched: usize,
    /// Batch records left as Unknown
    pub unmatched: usize,
}

/// Join the service response onto the batch
pub fn reconcile(
    batch: &ScanBatch,
    response: &[ClassificationEntry],
    config: &TriageConfig,
) -> Result<MergePlan, TriageError> {
    if response.is_empty() {
        return Err(TriageError::Classification(
            "service returned no classifications".to_string(),
        ));
    }

    let mut slots: Vec<Option<Classification>> = vec![None; batch.len()];

    // Echoed slots are authoritative when the name agrees
    let mut by_name: HashMap<&str, &ClassificationEntry> = HashMap::new();
    for entry in response {
        let echoed = entry.slot.filter(|&slot| {
            slot < batch.len() && batch.entries[slot].name == entry.name && slots[slot].is_none()
        });
        if let Some(slot) = echoed {
            slots[slot] = Some(entry.to_classification());
        }
        by_name.entry(entry.name.as_str()).or_insert(entry);
    }

    // A name's first answer covers every remaining record with that name
    for (slot, batch_entry) in batch.entries.iter().enumerate() {
        if slots[slot].is_none() {
            if let Some(entry) = by_name.get(batch_entry.name.as_str()) {
                slots[slot] = Some(entry.to_classification());
            }
        }
    }

    let matched = slots.iter().filter(|s| s.is_some()).count();
    let unmatched = batch.len() - matched;

    let assignments = batch
        .ids
        .iter()
        .zip(&batch.entries)
        .zip(slots)
        .map(|((&id, batch_entry), slot)| {
            let classification = slot.unwrap_or_else(Classification::unanalyzed);
            let classification = if config.is_protected(&batch_entry.name) {
                Classification::protected(classification.description)
            } else {
                classification
            };
            (id, classification)
        })
        .collect();

    Ok(MergePlan {
        assignments,
        matched,
        unmatched,
    })
}

/// Write a plan into the inventory and return the automatic selection
pub fn apply(records: &mut [ProcessRecord], plan: MergePlan) -> BTreeSet<ProcessId> {
    let mut index: HashMap<ProcessId, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id, i))
        .collect();

    let mut selected = BTreeSet::new();
    for (id, classification) in plan.assignments {
        // Records confirmed for removal while the scan ran are gone
        let Some(i) = index.remove(&id) else {
            log::debug!("Skipping classification for removed record {}", id);
            continue;
        };
        if classification.is_recommended_kill() {
            selected.insert(id);
        }
        records[i].classification = Some(classification);
    }

    selected
}
