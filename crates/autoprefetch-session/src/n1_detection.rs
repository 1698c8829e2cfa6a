//! N+1 load detection.
//!
//! Peer batching removes the N+1 pattern wherever it applies, but not every
//! access can batch: plain fields, models without peer groups, collection
//! relations with the switch off, and records that were loaded on their own.
//! The tracker counts the individual loads that still happen, per
//! (model, relation), and warns once a pair reaches the threshold. Batched
//! loads are counted separately so the two can be compared.
//!
//! # Example
//!
//! ```ignore
//! session.enable_n1_detection(3);
//!
//! // With the collection switch off, each access loads on its own
//! for author in &authors {
//!     session.get_many(&mut loader, *author, "books")?;
//! }
//! assert_eq!(session.n1_stats().unwrap().potential_n1, 1);
//! ```

use std::collections::HashMap;
use std::panic::Location;

type RelationKey = (String, String);

/// Tracks individual and batched relation loads.
#[derive(Debug)]
pub struct N1QueryTracker {
    /// (model, relation) -> individual load count
    counts: HashMap<RelationKey, usize>,
    /// (model, relation) -> batched load count
    batches: HashMap<RelationKey, usize>,
    /// Threshold for warning (individual loads per relation)
    threshold: usize,
    enabled: bool,
    /// Captured call sites of individual loads
    call_sites: Vec<CallSite>,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where an individual load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub model: String,
    pub relation: String,
    /// Source file of the triggering access
    pub file: &'static str,
    pub line: u32,
    pub timestamp: std::time::Instant,
}

/// Statistics about N+1 detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Total number of individual loads recorded
    pub total_loads: usize,
    /// Total number of batched loads recorded
    pub batch_loads: usize,
    /// Number of distinct relations loaded individually
    pub relations_loaded: usize,
    /// Number of relations whose individual loads reached the threshold
    pub potential_n1: usize,
}

impl N1QueryTracker {
    /// Create a new tracker with default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            batches: HashMap::new(),
            threshold: 3,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record an individual load.
    ///
    /// Emits a warning when the count for the (model, relation) pair reaches
    /// the threshold.
    #[track_caller]
    pub fn record_load(&mut self, model: &str, relation: &str) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((model.to_string(), relation.to_string()))
            .or_insert(0);
        *count += 1;
        let count = *count;

        let caller = Location::caller();
        self.call_sites.push(CallSite {
            model: model.to_string(),
            relation: relation.to_string(),
            file: caller.file(),
            line: caller.line(),
            timestamp: std::time::Instant::now(),
        });

        if count == self.threshold {
            self.emit_warning(model, relation, count);
        }
    }

    /// Record one batched load.
    pub fn record_batch(&mut self, model: &str, relation: &str) {
        if !self.enabled {
            return;
        }
        *self
            .batches
            .entry((model.to_string(), relation.to_string()))
            .or_insert(0) += 1;
    }

    fn emit_warning(&self, model: &str, relation: &str, count: usize) {
        tracing::warn!(
            target: "autoprefetch::n1",
            model,
            relation,
            loads = count,
            threshold = self.threshold,
            "N+1 load pattern detected; the relation is loading record by record"
        );

        let sites = self
            .call_sites
            .iter()
            .filter(|s| s.model == model && s.relation == relation)
            .take(5);
        for (i, site) in sites.enumerate() {
            tracing::debug!(
                target: "autoprefetch::n1",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Reset all counts and call sites.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.batches.clear();
        self.call_sites.clear();
    }

    /// Individual loads recorded for a relation.
    #[must_use]
    pub fn count_for(&self, model: &str, relation: &str) -> usize {
        self.counts
            .get(&(model.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Batched loads recorded for a relation.
    #[must_use]
    pub fn batches_for(&self, model: &str, relation: &str) -> usize {
        self.batches
            .get(&(model.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            batch_loads: self.batches.values().sum(),
            relations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }

    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
