//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Latest failover decision per protection domain."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use fabric_resilience::FailoverDecision;
use indexmap::IndexMap;

/// Lock-free board of the most recent decision per domain.
///
/// Each domain has exactly one writer, its evaluator task.
#[derive(Debug, Default)]
pub struct DecisionBoard {
    slots: IndexMap<String, ArcSwapOption<FailoverDecision>>,
}

impl DecisionBoard {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: domains
                .into_iter()
                .map(|domain| (domain.into(), ArcSwapOption::empty()))
                .collect(),
        }
    }

    /// Returns false when the domain is not on the board.
    pub fn publish(&self, decision: FailoverDecision) -> bool {
        match self.slots.get(&decision.domain) {
            Some(slot) => {
                slot.store(Some(Arc::new(decision)));
                true
            }
            None => false,
        }
    }

    pub fn get(&self, domain: &str) -> Option<Arc<FailoverDecision>> {
        self.slots.get(domain)?.load_full()
    }

    /// Every published decision, in domain order.
    pub fn decisions(&self) -> Vec<FailoverDecision> {
        self.slots
            .values()
            .filter_map(|slot| slot.load_full())
            .map(|decision| FailoverDecision::clone(&decision))
            .collect()
    }
}
