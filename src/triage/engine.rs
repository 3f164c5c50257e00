//! The triage engine: owns the inventory and selection, and drives the
//! scan and select/confirm/terminate flows.
//!
//! All state changes happen on the thread that owns the engine. Scans and
//! lookups run on worker threads and report back over channels; their
//! results are applied by [`TriageEngine::poll`],
//! [`TriageEngine::wait_for_event`] or [`TriageEngine::run_until_idle`].
//! Termination is a logical removal from the inventory.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use super::enrichment::{EnrichmentCache, ExpandOutcome};
use super::error::TriageError;
use super::inventory::{InventorySource, check_unique_ids};
use super::merge::{apply, reconcile, split_batch};
use super::service::{ClassificationService, ProcessLookup};
use super::types::{ProcessId, ProcessRecord, ScanMode, SystemStats, TriageConfig};
use super::worker::{LookupResult, ScanResult, spawn_scan};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanState {
    Idle,
    Scanning(ScanMode),
}

/// Open confirmation: the selection as it was when the clean was requested
#[derive(Clone, Debug, PartialEq)]
pub struct CleanRequest {
    pub records: Vec<ProcessRecord>,
    pub total_memory_mb: u64,
}

/// Result of a committed clean
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<ProcessId>,
    pub memory_freed_mb: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ToggleOutcome {
    Selected,
    Deselected,
    /// Critical records cannot be selected
    Blocked,
    NotFound,
}

/// Notifications for the presentation layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    ScanStarted { mode: ScanMode },
    ScanComplete {
        analyzed: usize,
        matched: usize,
        selected: usize,
    },
    ClassificationFailed { reason: String },
    /// A scan replaced the selection while a confirmation was open
    CleanDiscarded,
    CleanCancelled,
    Cleaned { removed: usize, memory_freed_mb: u64 },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanStarted { mode } => write!(f, "Analyzing processes ({} scan)...", mode),
            Self::ScanComplete { selected, .. } if *selected > 0 => {
                write!(f, "Analysis complete. {} recommended actions selected.", selected)
            }
            Self::ScanComplete { .. } => f.write_str("Analysis complete. Nothing recommended."),
            Self::ClassificationFailed { reason } => write!(f, "Analysis failed: {}", reason),
            Self::CleanDiscarded => f.write_str("Selection changed; clean request discarded."),
            Self::CleanCancelled => f.write_str("Clean cancelled."),
            Self::Cleaned {
                memory_freed_mb, ..
            } => write!(f, "Freed {} MB of RAM!", format_thousands(*memory_freed_mb)),
        }
    }
}

fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Immutable view of engine state for rendering
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSnapshot {
    pub records: Vec<ProcessRecord>,
    pub selected: BTreeSet<ProcessId>,
    pub selected_memory_mb: u64,
    pub stats: SystemStats,
    pub scan: ScanState,
    /// Whether at least one scan has been merged
    pub analyzed: bool,
    pub pending_clean: Option<CleanRequest>,
    pub pending_lookups: usize,
}

pub struct TriageEngine {
    config: Arc<TriageConfig>,
    records: Vec<ProcessRecord>,
    selection: BTreeSet<ProcessId>,
    scan: ScanState,
    analyzed: bool,
    pending_clean: Option<CleanRequest>,
    classifier: Arc<dyn ClassificationService>,
    enrichment: EnrichmentCache,
    scan_tx: Sender<ScanResult>,
    scan_rx: Receiver<ScanResult>,
    notices: VecDeque<Notice>,
}

impl TriageEngine {
    pub fn new(
        config: Arc<TriageConfig>,
        records: Vec<ProcessRecord>,
        classifier: Arc<dyn ClassificationService>,
        lookup: Arc<dyn ProcessLookup>,
    ) -> Result<Self, TriageError> {
        check_unique_ids(&records)?;

        let (scan_tx, scan_rx) = crossbeam_channel::unbounded();
        let enrichment = EnrichmentCache::new(lookup, config.max_sources);

        log::info!("Triage engine started with {} processes", records.len());

        Ok(Self {
            config,
            records,
            selection: BTreeSet::new(),
            scan: ScanState::Idle,
            analyzed: false,
            pending_clean: None,
            classifier,
            enrichment,
            scan_tx,
            scan_rx,
            notices: VecDeque::new(),
        })
    }

    /// Build an engine from an inventory source
    pub fn from_source(
        config: Arc<TriageConfig>,
        source: &mut dyn InventorySource,
        classifier: Arc<dyn ClassificationService>,
        lookup: Arc<dyn ProcessLookup>,
    ) -> anyhow::Result<Self> {
        let records = source.collect()?;
        Ok(Self::new(config, records, classifier, lookup)?)
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }

    pub fn record(&self, id: ProcessId) -> Option<&ProcessRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn selection(&self) -> &BTreeSet<ProcessId> {
        &self.selection
    }

    pub fn is_selected(&self, id: ProcessId) -> bool {
        self.selection.contains(&id)
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.scan, ScanState::Scanning(_))
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    /// Whether the clean action is available
    pub fn can_clean(&self) -> bool {
        !self.selection.is_empty()
    }

    pub fn pending_clean(&self) -> Option<&CleanRequest> {
        self.pending_clean.as_ref()
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats::from_records(&self.records, self.config.total_memory_gb)
    }

    pub fn selected_memory_mb(&self) -> u64 {
        self.selected_records().map(|r| r.memory_mb).sum()
    }

    fn selected_records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records
            .iter()
            .filter(|r| self.selection.contains(&r.id))
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            records: self.records.clone(),
            selected: self.selection.clone(),
            selected_memory_mb: self.selected_memory_mb(),
            stats: self.stats(),
            scan: self.scan,
            analyzed: self.analyzed,
            pending_clean: self.pending_clean.clone(),
            pending_lookups: self.enrichment.in_flight(),
        }
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, notice: Notice) {
        log::debug!("Notice: {}", notice);
        self.notices.push_back(notice);
    }

    /// Submit the analyzable prefix of the inventory for classification
    pub fn scan(&mut self, mode: ScanMode) -> Result<(), TriageError> {
        if self.is_scanning() {
            return Err(TriageError::ScanInProgress);
        }
        if !self.classifier.is_available() {
            log::warn!("Scan requested without a configured API key");
            return Err(TriageError::Configuration);
        }

        let batch = split_batch(&self.records, self.config.batch_ceiling, mode);
        self.notify(Notice::ScanStarted { mode });

        if batch.is_empty() {
            log::info!("Nothing to classify");
            self.selection.clear();
            if self.pending_clean.take().is_some() {
                self.notify(Notice::CleanDiscarded);
            }
            self.notify(Notice::ScanComplete {
                analyzed: 0,
                matched: 0,
                selected: 0,
            });
            return Ok(());
        }

        self.scan = ScanState::Scanning(mode);
        spawn_scan(self.classifier.clone(), batch, self.scan_tx.clone());
        Ok(())
    }

    fn handle_scan_result(&mut self, result: ScanResult) {
        self.scan = ScanState::Idle;

        let plan = result
            .outcome
            .and_then(|entries| reconcile(&result.batch, &entries, &self.config));

        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("Scan aborted, inventory unchanged: {}", e);
                self.notify(Notice::ClassificationFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let analyzed = plan.assignments.len();
        let matched = plan.matched;
        self.selection = apply(&mut self.records, plan);
        self.analyzed = true;

        log::info!(
            "Merged {} classifications ({} answered, {} selected)",
            analyzed,
            matched,
            self.selection.len()
        );

        if self.pending_clean.take().is_some() {
            self.notify(Notice::CleanDiscarded);
        }
        self.notify(Notice::ScanComplete {
            analyzed,
            matched,
            selected: self.selection.len(),
        });
    }

    /// Flip selection of a record; Critical records are never selectable
    pub fn toggle(&mut self, id: ProcessId) -> ToggleOutcome {
        let Some(record) = self.record(id) else {
            return ToggleOutcome::NotFound;
        };
        if record.is_critical() {
            log::debug!("Refusing to select critical process {}", record.name);
            return ToggleOutcome::Blocked;
        }

        if self.selection.remove(&id) {
            ToggleOutcome::Deselected
        } else {
            self.selection.insert(id);
            ToggleOutcome::Selected
        }
    }

    /// Open the confirmation with a snapshot of the current selection
    pub fn initiate_clean(&mut self) -> Option<&CleanRequest> {
        if self.selection.is_empty() {
            return None;
        }

        let records: Vec<ProcessRecord> = self.selected_records().cloned().collect();
        let total_memory_mb = records.iter().map(|r| r.memory_mb).sum();

        self.pending_clean = Some(CleanRequest {
            records,
            total_memory_mb,
        });
        self.pending_clean.as_ref()
    }

    pub fn cancel_clean(&mut self) -> bool {
        if self.pending_clean.take().is_some() {
            self.notify(Notice::CleanCancelled);
            true
        } else {
            false
        }
    }

    /// Remove the confirmed records and report the memory freed
    pub fn confirm_clean(&mut self) -> Option<CleanReport> {
        let request = self.pending_clean.take()?;

        let removed: Vec<ProcessId> = request.records.iter().map(|r| r.id).collect();
        let doomed: HashSet<ProcessId> = removed.iter().copied().collect();
        self.records.retain(|r| !doomed.contains(&r.id));
        self.selection.clear();

        log::info!(
            "Terminated {} processes, freed {} MB",
            removed.len(),
            request.total_memory_mb
        );

        self.notify(Notice::Cleaned {
            removed: removed.len(),
            memory_freed_mb: request.total_memory_mb,
        });

        Some(CleanReport {
            removed,
            memory_freed_mb: request.total_memory_mb,
        })
    }

    /// Expand a row, looking up details for undescribed records once
    pub fn expand(&mut self, id: ProcessId) -> ExpandOutcome {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => self.enrichment.expand(record),
            None => ExpandOutcome::NotFound,
        }
    }

    /// Start a fresh lookup for a record whose lookup failed
    pub fn retry_enrichment(&mut self, id: ProcessId) -> ExpandOutcome {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => self.enrichment.retry(record),
            None => ExpandOutcome::NotFound,
        }
    }

    fn handle_lookup_result(&mut self, result: LookupResult) {
        self.enrichment.complete(&mut self.records, result);
    }

    /// Whether a scan or lookup is still outstanding
    pub fn is_busy(&self) -> bool {
        self.is_scanning() || self.enrichment.in_flight() > 0
    }

    /// Apply every completed operation without blocking
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.scan_rx.try_recv() {
            self.handle_scan_result(result);
            handled += 1;
        }
        while let Ok(result) = self.enrichment.results().try_recv() {
            self.handle_lookup_result(result);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one completed operation and apply it
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        let scan_rx = self.scan_rx.clone();
        let lookup_rx = self.enrichment.results().clone();

        crossbeam_channel::select! {
            recv(scan_rx) -> msg => match msg {
                Ok(result) => {
                    self.handle_scan_result(result);
                    true
                }
                Err(_) => false,
            },
            recv(lookup_rx) -> msg => match msg {
                Ok(result) => {
                    self.handle_lookup_result(result);
                    true
                }
                Err(_) => false,
            },
            default(timeout) => false,
        }
    }

    /// Apply results until nothing is outstanding. Returns false on timeout.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for_event(remaining) {
                return !self.is_busy();
            }
        }
        true
    }
}
