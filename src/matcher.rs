//! Request matching logic.
//!
//! Selects the single best definition for a request. Scenarios are tried
//! along the fallback chain (active scenario, its parents, then `default`);
//! the first scenario with any candidate supplies the result, and within it
//! candidates are ranked by:
//!
//! 1. path specificity (literals > parameters > wildcard)
//! 2. effective priority
//! 3. revision, most recently written first
//! 4. id, ascending
//!
//! Method is a filter only. A wildcard-method definition with a higher
//! priority beats an exact-method one on the same pattern.
//!
//! The last key makes the order total, so the same catalog and request
//! always resolve to the same definition.

use crate::definition::MockDefinition;
use crate::descriptor::RequestDescriptor;
use crate::pattern::Specificity;
use crate::store::{Catalog, Entry};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Context captured during matching (for template variables).
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Path parameters bound by the pattern
    pub path_params: HashMap<String, String>,
}

/// Result of resolving a request.
#[derive(Debug)]
pub struct Resolution<'a> {
    /// The matched definition
    pub definition: &'a MockDefinition,
    /// Context captured during matching
    pub context: MatchContext,
    /// Scenario that supplied the definition
    pub scenario: String,
    /// Specificity of the matched pattern
    pub specificity: Specificity,
}

/// Request matcher over one catalog snapshot.
pub struct Matcher<'a> {
    catalog: &'a Catalog,
}

struct Candidate<'a> {
    entry: &'a Entry,
    params: HashMap<String, String>,
    specificity: Specificity,
    priority: i32,
}

impl<'a> Matcher<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Find the best definition for `descriptor` under `scenario`.
    pub fn resolve(
        &self,
        descriptor: &RequestDescriptor,
        scenario: &str,
    ) -> Option<Resolution<'a>> {
        for name in self.catalog.fallback_chain(scenario) {
            let best = self
                .candidates(descriptor, &name)
                .into_iter()
                .max_by(compare);

            if let Some(best) = best {
                trace!(
                    mock_id = %best.entry.definition.id,
                    scenario = %name,
                    requested = %scenario,
                    "Resolved candidate"
                );
                return Some(Resolution {
                    definition: &best.entry.definition,
                    context: MatchContext {
                        path_params: best.params,
                    },
                    scenario: name,
                    specificity: best.specificity,
                });
            }
            trace!(scenario = %name, "No candidate in scenario");
        }
        None
    }

    fn candidates(&self, descriptor: &RequestDescriptor, scenario: &str) -> Vec<Candidate<'a>> {
        let catalog: &'a Catalog = self.catalog;
        catalog
            .entries()
            .iter()
            .filter(|entry| entry.definition.scenario == scenario)
            .filter_map(|entry| {
                let def = &entry.definition;
                if !def.enabled || !def.method.matches(&descriptor.method) {
                    return None;
                }
                let params = entry.pattern.matches(&descriptor.path)?;
                trace!(mock_id = %def.id, pattern = %entry.pattern, "Candidate matched");
                Some(Candidate {
                    entry,
                    params,
                    specificity: entry.pattern.specificity(),
                    priority: def.effective_priority(&entry.pattern),
                })
            })
            .collect()
    }
}

/// Greater means a better match.
fn compare(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    let (da, db) = (&a.entry.definition, &b.entry.definition);
    a.specificity
        .cmp(&b.specificity)
        .then(a.priority.cmp(&b.priority))
        .then(da.revision.cmp(&db.revision))
        .then(db.id.cmp(&da.id))
}
