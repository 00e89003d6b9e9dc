//! Per-job record of posted segments

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// One posted article
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentEntry {
    pub number: u32,
    /// Raw (unencoded) chunk length
    pub bytes: u64,
    pub message_id: String,
}

/// Outcome of recording a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// First entry for this chunk; `job_complete` is set by the entry that fills the job
    New { job_complete: bool },
    /// The chunk was already recorded; the earlier entry wins
    Duplicate,
}

struct JobSegments {
    expected: u32,
    entries: Mutex<BTreeMap<u32, SegmentEntry>>,
}

/// Segments keyed by job and chunk index, so a retried chunk is recorded once
pub struct SegmentLedger {
    jobs: Vec<JobSegments>,
}

impl SegmentLedger {
    /// One slot per job, sized by its chunk count
    pub fn new<I: IntoIterator<Item = u32>>(chunk_counts: I) -> Self {
        Self {
            jobs: chunk_counts
                .into_iter()
                .map(|expected| JobSegments {
                    expected,
                    entries: Mutex::new(BTreeMap::new()),
                })
                .collect(),
        }
    }

    pub fn record(&self, job: usize, entry: SegmentEntry) -> Recorded {
        let Some(slot) = self.jobs.get(job) else {
            tracing::warn!(job, "Segment recorded for unknown job");
            return Recorded::Duplicate;
        };

        let mut entries = slot.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&entry.number) {
            return Recorded::Duplicate;
        }
        entries.insert(entry.number, entry);
        Recorded::New {
            job_complete: entries.len() as u32 == slot.expected,
        }
    }

    /// Entries of one job sorted by chunk index
    pub fn segments(&self, job: usize) -> Vec<SegmentEntry> {
        self.jobs
            .get(job)
            .map(|slot| {
                slot.entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn recorded(&self, job: usize) -> usize {
        self.jobs
            .get(job)
            .map(|slot| slot.entries.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    pub fn is_complete(&self, job: usize) -> bool {
        self.jobs
            .get(job)
            .is_some_and(|slot| self.recorded(job) as u32 == slot.expected)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
