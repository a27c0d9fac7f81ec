use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::domain::activity::{Activity, ActivityPatch};
use crate::domain::link::{LinkType, PredecessorLink};
use crate::domain::node_id::{ActivityKey, NodeId};
use crate::resolver::ResolutionIndex;

/// One entry of a successor-view edit: "`reference` should follow me with
/// this type and lag".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorEdit {
    pub reference: String,
    pub link_type: LinkType,
    pub lag: i64,
}

impl SuccessorEdit {
    pub fn new(reference: impl Into<String>, link_type: LinkType, lag: i64) -> Self {
        Self {
            reference: reference.into(),
            link_type,
            lag,
        }
    }
}

/// A derived successor: `successor` stores a descriptor naming the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessorLink {
    pub successor: NodeId,
    pub link_type: LinkType,
    pub lag: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The requested activity no longer resolves in this schedule.
    Unresolved,
    SelfReference,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictReason::Unresolved => "no longer resolvable",
            ConflictReason::SelfReference => "refers to the activity itself",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    pub reference: String,
    pub reason: ConflictReason,
}

/// The writes one edit needs, keyed by storage key.
///
/// `primary` is the activity the user edited; its own update (if any) must be
/// confirmed before the remaining updates are issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub primary: Option<ActivityKey>,
    pub updates: BTreeMap<ActivityKey, ActivityPatch>,
    pub deletions: Vec<ActivityKey>,
    pub conflicts: Vec<SyncConflict>,
}

impl SyncPlan {
    pub fn for_activity(primary: ActivityKey) -> Self {
        Self {
            primary: Some(primary),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletions.is_empty() && self.conflicts.is_empty()
    }

    pub fn update(&mut self, key: ActivityKey, patch: ActivityPatch) {
        match self.updates.get_mut(&key) {
            Some(existing) => existing.merge(patch),
            None => {
                self.updates.insert(key, patch);
            }
        }
    }

    /// Folds a plan that was computed on top of this one.
    pub fn then(mut self, later: SyncPlan) -> SyncPlan {
        if self.primary.is_none() {
            self.primary = later.primary;
        }
        for (key, patch) in later.updates {
            self.update(key, patch);
        }
        for key in later.deletions {
            if !self.deletions.contains(&key) {
                self.updates.remove(&key);
                self.deletions.push(key);
            }
        }
        self.conflicts.extend(later.conflicts);
        self
    }

    /// Updates to activities other than the primary one.
    pub fn secondary_updates(&self) -> impl Iterator<Item = (&ActivityKey, &ActivityPatch)> {
        self.updates
            .iter()
            .filter(move |(key, _)| Some(*key) != self.primary.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    UnknownActivity(ActivityKey),
    LinkNotFound { source: ActivityKey, target: ActivityKey },
    SelfLink(ActivityKey),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::UnknownActivity(key) => {
                write!(f, "activity '{}' is not part of this schedule", key)
            }
            SyncError::LinkNotFound { source, target } => {
                write!(f, "'{}' does not list '{}' as a predecessor", target, source)
            }
            SyncError::SelfLink(key) => write!(f, "activity '{}' cannot depend on itself", key),
        }
    }
}

impl Error for SyncError {}

/// Keeps predecessor and successor views consistent over one schedule.
///
/// The target's predecessor list is the only stored form of an edge; successor
/// views are computed by scanning it, so every edit here turns into updates
/// of predecessor lists.
pub struct DependencySynchronizer<'a> {
    scope: &'a [Activity],
    index: ResolutionIndex,
}

impl<'a> DependencySynchronizer<'a> {
    pub fn new(scope: &'a [Activity]) -> Self {
        Self {
            scope,
            index: ResolutionIndex::new(scope),
        }
    }

    pub fn activity(&self, key: &ActivityKey) -> Result<&'a Activity, SyncError> {
        self.scope
            .iter()
            .find(|activity| &activity.key == key)
            .ok_or_else(|| SyncError::UnknownActivity(key.clone()))
    }

    pub fn resolve(&self, reference: &str) -> Option<&'a Activity> {
        let node = self.index.resolve(reference)?;
        self.scope.iter().find(|activity| activity.key == node.key)
    }

    fn names(&self, link: &PredecessorLink, subject: &Activity) -> bool {
        self.resolve(&link.predecessor)
            .is_some_and(|found| found.key == subject.key)
    }

    pub fn successors_of(&self, key: &ActivityKey) -> Result<Vec<SuccessorLink>, SyncError> {
        let subject = self.activity(key)?;
        let mut successors = Vec::new();
        for candidate in self.scope {
            if candidate.key == subject.key {
                continue;
            }
            if let Some(link) = candidate
                .predecessors()
                .into_iter()
                .find(|link| self.names(link, subject))
            {
                successors.push(SuccessorLink {
                    successor: candidate.node_id(),
                    link_type: link.link_type,
                    lag: link.lag,
                });
            }
        }
        Ok(successors)
    }

    /// Replaces an activity's predecessor list. Only that activity changes.
    ///
    /// References that resolve to the same activity collapse into one entry
    /// (first position, last type/lag). Self references become conflicts;
    /// references that do not resolve are stored as written.
    pub fn apply_predecessor_edit(
        &self,
        key: &ActivityKey,
        requested: Vec<PredecessorLink>,
    ) -> Result<SyncPlan, SyncError> {
        let subject = self.activity(key)?;
        let mut plan = SyncPlan::for_activity(subject.key.clone());
        let mut links: Vec<PredecessorLink> = Vec::with_capacity(requested.len());
        let mut slots: Vec<Option<ActivityKey>> = Vec::with_capacity(requested.len());

        for mut link in requested {
            let resolved = self.resolve(&link.predecessor);
            if let Some(found) = resolved {
                if found.key == subject.key {
                    plan.conflicts.push(SyncConflict {
                        reference: link.predecessor,
                        reason: ConflictReason::SelfReference,
                    });
                    continue;
                }
                if link.predecessor.parse::<NodeId>().is_ok() {
                    link.predecessor = found.key.as_str().to_string();
                }
            }

            let slot = resolved.map(|found| found.key.clone());
            let existing = match &slot {
                Some(source) => slots.iter().position(|seen| seen.as_ref() == Some(source)),
                None => links
                    .iter()
                    .zip(&slots)
                    .position(|(seen, slot)| slot.is_none() && seen.predecessor == link.predecessor),
            };
            match existing {
                Some(position) => {
                    links[position].link_type = link.link_type;
                    links[position].lag = link.lag;
                }
                None => {
                    links.push(link);
                    slots.push(slot);
                }
            }
        }

        plan.update(
            subject.key.clone(),
            ActivityPatch::predecessors(codec::encode(&links)),
        );
        Ok(plan)
    }

    /// Applies an edit made through the successor view of `key`.
    ///
    /// Successors that disappear lose their descriptor naming `key`; new or
    /// changed ones get exactly one descriptor naming `key` with the requested
    /// type and lag. Activities whose stored list would not change are left
    /// out of the plan.
    pub fn apply_successor_edit(
        &self,
        key: &ActivityKey,
        requested: Vec<SuccessorEdit>,
    ) -> Result<SyncPlan, SyncError> {
        let subject = self.activity(key)?;
        let mut plan = SyncPlan::for_activity(subject.key.clone());

        let mut wanted: Vec<(&'a Activity, LinkType, i64)> = Vec::new();
        for edit in requested {
            let Some(target) = self.resolve(&edit.reference) else {
                debug!(subject = %subject.key, reference = %edit.reference, "successor no longer resolves");
                plan.conflicts.push(SyncConflict {
                    reference: edit.reference,
                    reason: ConflictReason::Unresolved,
                });
                continue;
            };
            if target.key == subject.key {
                plan.conflicts.push(SyncConflict {
                    reference: edit.reference,
                    reason: ConflictReason::SelfReference,
                });
                continue;
            }
            match wanted.iter_mut().find(|(seen, _, _)| seen.key == target.key) {
                Some(entry) => {
                    entry.1 = edit.link_type;
                    entry.2 = edit.lag;
                }
                None => wanted.push((target, edit.link_type, edit.lag)),
            }
        }

        let wanted_keys = wanted
            .iter()
            .map(|(target, _, _)| target.key.clone())
            .collect::<HashSet<_>>();
        for current in self.successors_of(key)? {
            if wanted_keys.contains(&current.successor.key) {
                continue;
            }
            let successor = self.activity(&current.successor.key)?;
            let stripped = self.without_links_to(successor, subject);
            plan.update(
                successor.key.clone(),
                ActivityPatch::predecessors(codec::encode(&stripped)),
            );
        }

        for (target, link_type, lag) in wanted {
            if let Some(links) = self.upserted(target, subject, link_type, lag) {
                plan.update(
                    target.key.clone(),
                    ActivityPatch::predecessors(codec::encode(&links)),
                );
            }
        }

        Ok(plan)
    }

    /// Adds `source -> target`, or updates its type/lag if it already exists.
    pub fn add_link(
        &self,
        source: &ActivityKey,
        target: &ActivityKey,
        link_type: LinkType,
        lag: i64,
    ) -> Result<SyncPlan, SyncError> {
        let source = self.activity(source)?;
        let target = self.activity(target)?;
        if source.key == target.key {
            return Err(SyncError::SelfLink(source.key.clone()));
        }
        let mut plan = SyncPlan::for_activity(target.key.clone());
        if let Some(links) = self.upserted(target, source, link_type, lag) {
            plan.update(
                target.key.clone(),
                ActivityPatch::predecessors(codec::encode(&links)),
            );
        }
        Ok(plan)
    }

    pub fn remove_link(
        &self,
        source: &ActivityKey,
        target: &ActivityKey,
    ) -> Result<SyncPlan, SyncError> {
        let source_activity = self.activity(source)?;
        let target_activity = self.activity(target)?;
        let current = target_activity.predecessors();
        let stripped = self.without_links_to(target_activity, source_activity);
        if stripped.len() == current.len() {
            return Err(SyncError::LinkNotFound {
                source: source.clone(),
                target: target.clone(),
            });
        }
        let mut plan = SyncPlan::for_activity(target.clone());
        plan.update(
            target.clone(),
            ActivityPatch::predecessors(codec::encode(&stripped)),
        );
        Ok(plan)
    }

    /// Deletes an activity and strips it from every predecessor list in scope.
    pub fn remove_activity(&self, key: &ActivityKey) -> Result<SyncPlan, SyncError> {
        let subject = self.activity(key)?;
        let mut plan = SyncPlan::for_activity(subject.key.clone());
        plan.deletions.push(subject.key.clone());
        for current in self.successors_of(key)? {
            let successor = self.activity(&current.successor.key)?;
            let stripped = self.without_links_to(successor, subject);
            plan.update(
                successor.key.clone(),
                ActivityPatch::predecessors(codec::encode(&stripped)),
            );
        }
        Ok(plan)
    }

    fn without_links_to(&self, holder: &Activity, source: &Activity) -> Vec<PredecessorLink> {
        holder
            .predecessors()
            .into_iter()
            .filter(|link| !self.names(link, source))
            .collect()
    }

    /// `holder`'s list with exactly one descriptor naming `source`, or `None`
    /// when the stored list already has exactly that.
    fn upserted(
        &self,
        holder: &Activity,
        source: &Activity,
        link_type: LinkType,
        lag: i64,
    ) -> Option<Vec<PredecessorLink>> {
        let current = holder.predecessors();
        let naming = current
            .iter()
            .filter(|link| self.names(link, source))
            .collect::<Vec<_>>();
        if let [existing] = naming.as_slice() {
            if existing.link_type == link_type && existing.lag == lag {
                return None;
            }
        }
        let mut links = self.without_links_to(holder, source);
        links.push(PredecessorLink::new(source.key.as_str(), link_type, lag));
        Some(links)
    }
}
