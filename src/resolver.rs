use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::Serialize;

use crate::domain::activity::Activity;
use crate::domain::node_id::NodeId;

/// Anything a predecessor reference can be resolved against.
pub trait Resolvable {
    fn node_id(&self) -> NodeId;
    /// The schedule-local storage key (record id or provisional id).
    fn local_key(&self) -> &str;
    fn linked_document_id(&self) -> Option<&str>;
    fn display_name(&self) -> &str;
}

impl Resolvable for Activity {
    fn node_id(&self) -> NodeId {
        Activity::node_id(self)
    }

    fn local_key(&self) -> &str {
        self.key.as_str()
    }

    fn linked_document_id(&self) -> Option<&str> {
        self.linked_document_id.as_deref()
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    Direct,
    LinkedDocument,
    DisplayName,
}

impl ResolutionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionTier::Direct => "direct",
            ResolutionTier::LinkedDocument => "linked_document",
            ResolutionTier::DisplayName => "display_name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub node: NodeId,
    pub tier: ResolutionTier,
}

/// Lookup tables over one candidate set, one per resolution tier.
///
/// Within a tier the first candidate in input order wins, so the same
/// candidate list always resolves a reference the same way.
#[derive(Debug, Clone, Default)]
pub struct ResolutionIndex {
    by_key: HashMap<String, NodeId>,
    nodes: HashSet<NodeId>,
    by_linked: HashMap<String, NodeId>,
    by_name: HashMap<String, NodeId>,
    name_counts: HashMap<String, usize>,
}

impl ResolutionIndex {
    pub fn new<'a, T, I>(candidates: I) -> Self
    where
        T: Resolvable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut index = Self::default();
        for candidate in candidates {
            index.insert(candidate);
        }
        index
    }

    pub fn insert<T: Resolvable + ?Sized>(&mut self, candidate: &T) {
        let node = candidate.node_id();
        self.by_key
            .entry(candidate.local_key().to_string())
            .or_insert_with(|| node.clone());
        if let Some(linked) = candidate.linked_document_id().map(str::trim) {
            if !linked.is_empty() {
                self.by_linked
                    .entry(linked.to_string())
                    .or_insert_with(|| node.clone());
            }
        }
        let name = candidate.display_name().trim();
        if !name.is_empty() {
            *self.name_counts.entry(name.to_string()).or_default() += 1;
            self.by_name
                .entry(name.to_string())
                .or_insert_with(|| node.clone());
        }
        self.nodes.insert(node);
    }

    pub fn resolve(&self, reference: &str) -> Option<NodeId> {
        self.resolve_with_tier(reference).map(|resolution| resolution.node)
    }

    /// Direct id, then linked document, then display name.
    pub fn resolve_with_tier(&self, reference: &str) -> Option<Resolution> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if let Some(node) = self.resolve_direct(reference) {
            return Some(Resolution {
                node,
                tier: ResolutionTier::Direct,
            });
        }
        if let Some(node) = self.resolve_linked(reference) {
            return Some(Resolution {
                node,
                tier: ResolutionTier::LinkedDocument,
            });
        }
        self.by_name.get(reference).map(|node| Resolution {
            node: node.clone(),
            tier: ResolutionTier::DisplayName,
        })
    }

    /// Tier 1 only: the storage key, or a full node id in text form.
    pub fn resolve_direct(&self, reference: &str) -> Option<NodeId> {
        if let Some(node) = self.by_key.get(reference) {
            return Some(node.clone());
        }
        NodeId::from_str(reference)
            .ok()
            .filter(|node| self.nodes.contains(node))
    }

    /// Tier 2 only; used for cross-schedule lookups.
    pub fn resolve_linked(&self, reference: &str) -> Option<NodeId> {
        self.by_linked.get(reference.trim()).cloned()
    }

    /// Display names carried by more than one candidate, sorted by name.
    pub fn ambiguous_names(&self) -> Vec<(String, usize)> {
        let mut names = self
            .name_counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, count)| (name.clone(), *count))
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// One-shot resolution against a candidate list.
pub fn resolve<T: Resolvable>(reference: &str, candidates: &[T]) -> Option<NodeId> {
    ResolutionIndex::new(candidates).resolve(reference)
}

#[cfg(test)]
mod tests {
    use super::{resolve, ResolutionIndex, ResolutionTier};
    use crate::domain::activity::Activity;
    use crate::domain::node_id::{ActivityKey, ScheduleId};

    fn activity(key: &str, name: &str, linked: Option<&str>) -> Activity {
        let mut act = Activity::new(
            ActivityKey::Durable(key.to_string()),
            ScheduleId::parse("S1").expect("schedule id should parse"),
            name,
        );
        act.linked_document_id = linked.map(str::to_string);
        act
    }

    #[test]
    fn direct_key_match_wins_over_other_tiers() {
        let candidates = vec![
            activity("a-1", "Pour slab", Some("b-2")),
            activity("b-2", "Frame walls", None),
        ];
        let index = ResolutionIndex::new(&candidates);
        let hit = index.resolve_with_tier("b-2").expect("should resolve");
        assert_eq!(hit.node, candidates[1].node_id());
        assert_eq!(hit.tier, ResolutionTier::Direct);
    }

    #[test]
    fn linked_document_beats_display_name() {
        let candidates = vec![
            activity("a-1", "TASK-9", None),
            activity("b-2", "Frame walls", Some("TASK-9")),
        ];
        let hit = ResolutionIndex::new(&candidates)
            .resolve_with_tier("TASK-9")
            .expect("should resolve");
        assert_eq!(hit.node, candidates[1].node_id());
        assert_eq!(hit.tier, ResolutionTier::LinkedDocument);
    }

    #[test]
    fn display_name_is_last_resort_and_first_candidate_wins() {
        let candidates = vec![
            activity("a-1", "Inspection", None),
            activity("b-2", "Inspection", None),
        ];
        let index = ResolutionIndex::new(&candidates);
        let hit = index.resolve_with_tier("Inspection").expect("should resolve");
        assert_eq!(hit.node, candidates[0].node_id());
        assert_eq!(hit.tier, ResolutionTier::DisplayName);
        assert_eq!(index.ambiguous_names(), vec![("Inspection".to_string(), 2)]);
    }

    #[test]
    fn accepts_node_id_text_form() {
        let candidates = vec![activity("a-1", "Pour slab", None)];
        assert_eq!(
            resolve("rec:S1:a-1", &candidates),
            Some(candidates[0].node_id())
        );
        assert_eq!(resolve("rec:S2:a-1", &candidates), None);
    }

    #[test]
    fn misses_and_blank_references_resolve_to_none() {
        let candidates = vec![activity("a-1", "Pour slab", None)];
        assert_eq!(resolve("zzz", &candidates), None);
        assert_eq!(resolve("   ", &candidates), None);
        assert_eq!(resolve::<Activity>("a-1", &[]), None);
    }
}
