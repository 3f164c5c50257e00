//! Lazy, single-flight description lookups for records the classifier did
//! not describe.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use super::service::ProcessLookup;
use super::types::{EnrichmentState, ProcessId, ProcessRecord};
use super::worker::{LookupRequest, LookupResult, spawn_lookup};

/// What an expand request did
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpandOutcome {
    /// The record already has a classifier description
    Described,
    /// A lookup was started
    Started,
    /// A lookup for this record is already in flight
    AlreadyPending,
    /// The lookup finished earlier
    Cached,
    /// The lookup failed earlier; use an explicit retry
    Failed,
    /// No lookup capability is configured; the record is marked failed
    Unavailable,
    NotFound,
}

pub struct EnrichmentCache {
    lookup: Arc<dyn ProcessLookup>,
    max_sources: usize,
    in_flight: HashSet<ProcessId>,
    result_tx: Sender<LookupResult>,
    result_rx: Receiver<LookupResult>,
}

impl EnrichmentCache {
    pub fn new(lookup: Arc<dyn ProcessLookup>, max_sources: usize) -> Self {
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        Self {
            lookup,
            max_sources,
            in_flight: HashSet::new(),
            result_tx,
            result_rx,
        }
    }

    pub fn results(&self) -> &Receiver<LookupResult> {
        &self.result_rx
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Handle a row expansion
    pub fn expand(&mut self, record: &mut ProcessRecord) -> ExpandOutcome {
        if record.description().is_some() {
            return ExpandOutcome::Described;
        }

        match record.enrichment {
            EnrichmentState::NotAttempted => self.start(record),
            EnrichmentState::Pending => ExpandOutcome::AlreadyPending,
            EnrichmentState::Done(_) => ExpandOutcome::Cached,
            EnrichmentState::Failed => ExpandOutcome::Failed,
        }
    }

    /// Start a fresh attempt for a record whose lookup failed
    pub fn retry(&mut self, record: &mut ProcessRecord) -> ExpandOutcome {
        if record.description().is_some() {
            return ExpandOutcome::Described;
        }

        match record.enrichment {
            EnrichmentState::Failed => self.start(record),
            _ => self.expand(record),
        }
    }

    fn start(&mut self, record: &mut ProcessRecord) -> ExpandOutcome {
        if self.in_flight.contains(&record.id) {
            return ExpandOutcome::AlreadyPending;
        }

        if !self.lookup.is_available() {
            log::debug!("Lookup unavailable, marking {} as failed", record.name);
            record.enrichment = EnrichmentState::Failed;
            return ExpandOutcome::Unavailable;
        }

        record.enrichment = EnrichmentState::Pending;
        self.in_flight.insert(record.id);

        let request = LookupRequest {
            id: record.id,
            name: record.name.clone(),
        };
        spawn_lookup(
            self.lookup.clone(),
            request,
            self.max_sources,
            self.result_tx.clone(),
        );

        ExpandOutcome::Started
    }

    /// Store a finished lookup on its record. Returns false if the record is gone.
    pub fn complete(&mut self, records: &mut [ProcessRecord], result: LookupResult) -> bool {
        self.in_flight.remove(&result.id);

        let Some(record) = records.iter_mut().find(|r| r.id == result.id) else {
            log::debug!("Dropping lookup result for removed record {}", result.id);
            return false;
        };

        record.enrichment = match result.text {
            Some(text) => EnrichmentState::Done(text),
            None => EnrichmentState::Failed,
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::service::LookupAnswer;
    use crate::triage::types::{Category, Classification, DETAILS_UNAVAILABLE};
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingLookup {
        calls: AtomicUsize,
        fail: bool,
        available: bool,
    }

    impl CountingLookup {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
                available: true,
            }
        }
    }

    impl ProcessLookup for CountingLookup {
        fn is_available(&self) -> bool {
            self.available
        }

        fn lookup(&self, name: &str) -> Result<LookupAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("quota exceeded");
            }
            Ok(LookupAnswer {
                text: Some(format!("About {}", name)),
                sources: vec!["https://example.com".to_string()],
            })
        }
    }

    fn record(id: u64) -> ProcessRecord {
        ProcessRecord::new(ProcessId(id), "YourPhone.exe", 4242, 80, 0.0)
    }

    fn finish(cache: &mut EnrichmentCache, records: &mut [ProcessRecord]) {
        let result = cache
            .results()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        cache.complete(records, result);
    }

    #[test]
    fn test_described_record_skips_lookup() {
        let lookup = Arc::new(CountingLookup::new(false));
        let mut cache = EnrichmentCache::new(lookup.clone(), 2);
        let mut rec = record(1).with_classification(Classification {
            description: Some("Known".to_string()),
            ..Classification::unanalyzed()
        });

        assert_eq!(cache.expand(&mut rec), ExpandOutcome::Described);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lookup_is_cached() {
        let lookup = Arc::new(CountingLookup::new(false));
        let mut cache = EnrichmentCache::new(lookup.clone(), 2);
        let mut records = vec![record(1)];

        assert_eq!(cache.expand(&mut records[0]), ExpandOutcome::Started);
        assert!(records[0].enrichment.is_pending());
        finish(&mut cache, &mut records);

        assert_eq!(
            records[0].enrichment,
            EnrichmentState::Done("About YourPhone.exe\n\nSources:\nhttps://example.com".into())
        );
        assert_eq!(cache.expand(&mut records[0]), ExpandOutcome::Cached);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_failure_is_not_retried_by_expand() {
        let lookup = Arc::new(CountingLookup::new(true));
        let mut cache = EnrichmentCache::new(lookup.clone(), 2);
        let mut records = vec![record(1)];

        cache.expand(&mut records[0]);
        finish(&mut cache, &mut records);

        assert_eq!(records[0].enrichment, EnrichmentState::Failed);
        assert_eq!(records[0].enrichment.text(), Some(DETAILS_UNAVAILABLE));
        assert_eq!(cache.expand(&mut records[0]), ExpandOutcome::Failed);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.retry(&mut records[0]), ExpandOutcome::Started);
        finish(&mut cache, &mut records);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_skips_record_described_since_failure() {
        let lookup = Arc::new(CountingLookup::new(true));
        let mut cache = EnrichmentCache::new(lookup.clone(), 2);
        let mut records = vec![record(1)];

        cache.expand(&mut records[0]);
        finish(&mut cache, &mut records);
        assert_eq!(records[0].enrichment, EnrichmentState::Failed);

        records[0].classification = Some(Classification {
            description: Some("Phone Link companion".to_string()),
            ..Classification::unanalyzed()
        });
        assert_eq!(cache.retry(&mut records[0]), ExpandOutcome::Described);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_unavailable_lookup_fails_without_call() {
        let lookup = Arc::new(CountingLookup {
            available: false,
            ..CountingLookup::new(false)
        });
        let mut cache = EnrichmentCache::new(lookup.clone(), 2);
        let mut rec = record(1);

        assert_eq!(cache.expand(&mut rec), ExpandOutcome::Unavailable);
        assert_eq!(rec.enrichment, EnrichmentState::Failed);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enrichment_does_not_classify() {
        let lookup = Arc::new(CountingLookup::new(false));
        let mut cache = EnrichmentCache::new(lookup, 2);
        let mut records = vec![record(1).with_classification(Classification {
            category: Category::Unknown,
            ..Classification::unanalyzed()
        })];

        cache.expand(&mut records[0]);
        finish(&mut cache, &mut records);
        assert_eq!(
            records[0].classification,
            Some(Classification::unanalyzed())
        );
    }

    #[test]
    fn test_result_for_removed_record_dropped() {
        let lookup = Arc::new(CountingLookup::new(false));
        let mut cache = EnrichmentCache::new(lookup, 2);
        let mut records = vec![record(1)];

        cache.expand(&mut records[0]);
        let result = cache
            .results()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        records.clear();
        assert!(!cache.complete(&mut records, result));
        assert_eq!(cache.in_flight(), 0);
    }
}
