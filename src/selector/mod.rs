//! Selector generation, discovery and evolution
//!
//! This subsystem produces and repairs extraction rules without hardcoded
//! markup knowledge. It keeps one active selector per data type, discovers
//! replacements by scanning live pages, and evolves degraded selectors
//! when extraction quality drops.

pub mod discovery;
pub mod evolution;
pub mod generator;
pub mod page;

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::domain::selector::{DataType, SelectorCandidate, SelectorExpression};
pub use evolution::{CurrentResult, EvolutionAction, EvolutionReport};
pub use page::{PageElement, PageSnapshot};

/// Facade over discovery, variation generation and evolution, holding the
/// active selector per data type.
#[derive(Debug, Default)]
pub struct SelectorGenerator {
    active: RwLock<HashMap<DataType, SelectorCandidate>>,
}

impl SelectorGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the generator with starting selectors, typically from the
    /// last persisted run
    pub fn seed(&self, candidates: impl IntoIterator<Item = SelectorCandidate>) {
        let mut active = self.active.write().expect("selector registry poisoned");
        for candidate in candidates {
            active.insert(candidate.data_type, candidate);
        }
    }

    /// The selector currently used for a data type, if any
    #[must_use]
    pub fn active_for(&self, data_type: DataType) -> Option<SelectorCandidate> {
        self.active
            .read()
            .expect("selector registry poisoned")
            .get(&data_type)
            .cloned()
    }

    /// Adopts a candidate as the active selector for its data type
    pub fn adopt(&self, candidate: SelectorCandidate) {
        info!(
            data_type = %candidate.data_type,
            selector = %candidate.expression,
            confidence = candidate.confidence,
            "adopting selector"
        );
        self.active
            .write()
            .expect("selector registry poisoned")
            .insert(candidate.data_type, candidate);
    }

    /// Records a failed extraction against the active selector and drops
    /// it once it qualifies for discard
    pub fn record_failure(&self, data_type: DataType) {
        let mut active = self.active.write().expect("selector registry poisoned");
        if let Some(candidate) = active.get_mut(&data_type) {
            candidate.consecutive_failures += 1;
            if candidate.should_discard() {
                debug!(data_type = %data_type, "discarding repeatedly failing selector");
                active.remove(&data_type);
            }
        }
    }

    /// Resets the failure streak after a successful extraction
    pub fn record_success(&self, data_type: DataType) {
        let mut active = self.active.write().expect("selector registry poisoned");
        if let Some(candidate) = active.get_mut(&data_type) {
            candidate.consecutive_failures = 0;
        }
    }

    /// Deterministic mutation of one selector; see [`generator::generate_variations`]
    #[must_use]
    pub fn generate_variations(
        &self,
        selector: &SelectorExpression,
        max_variations: usize,
    ) -> Vec<SelectorExpression> {
        generator::generate_variations(selector, max_variations)
    }

    /// Scans a page for fresh candidates; see [`discovery::discover_patterns`]
    #[must_use]
    pub fn discover_patterns(&self, page: &PageSnapshot, data_type: DataType) -> Vec<SelectorCandidate> {
        discovery::discover_patterns(page, data_type)
    }

    /// Scores and repairs the currently-used selectors against a live
    /// page, adopting every replacement the evolution pass produces.
    pub fn evolve_selectors(
        &self,
        current_results: &[CurrentResult],
        expected_data: &[(DataType, Vec<String>)],
        page: &PageSnapshot,
    ) -> Vec<EvolutionReport> {
        let reports = evolution::evolve_selectors(current_results, expected_data, page);
        for report in &reports {
            if let Some(replacement) = &report.replacement {
                self.adopt(replacement.clone());
            }
        }
        reports
    }
}
