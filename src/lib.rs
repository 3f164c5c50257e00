//! AI-assisted process triage.
//!
//! A [`triage::TriageEngine`] holds a process inventory, sends its leading
//! records to a classification service, selects the ones judged safe to
//! terminate, and removes them after confirmation.

pub mod triage;
