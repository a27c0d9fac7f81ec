use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec;
use crate::domain::activity::{Activity, ActivityPatch, Schedule};
use crate::domain::dates::{
    derive_end_date, duration_in_range, format_date, normalize_date, parse_date,
    MAX_DURATION_DAYS,
};
use crate::domain::link::{LinkType, PredecessorLink};
use crate::domain::node_id::{ActivityKey, NodeId, ScheduleId};
use crate::graph::{build, BuildOptions, GraphEdge, GraphNode, ScheduleGraph};
use crate::provisional::{self, PromoteError, ProvisionalSeed};
use crate::store::{DocumentStore, StoreError};
use crate::synchronizer::{
    DependencySynchronizer, SuccessorEdit, SuccessorLink, SyncConflict, SyncError, SyncPlan,
};

/// Events the Gantt widget reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    DateChanged {
        node: NodeId,
        start_date: String,
        duration: Option<i64>,
    },
    LinkAdded {
        source: NodeId,
        target: NodeId,
    },
    LinkRemoved {
        edge_id: String,
    },
    NodeDeleted {
        node: NodeId,
    },
    NodeClicked {
        node: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Edit(PlannedEdit),
    Detail(Box<DetailView>),
}

/// A synchronizer plan bound to the schedule whose keys it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdit {
    pub schedule: ScheduleId,
    pub plan: SyncPlan,
    /// Predecessor rewrites in other schedules, issued after the plan's own
    /// updates.
    pub cross_schedule: Vec<(NodeId, ActivityPatch)>,
}

impl PlannedEdit {
    pub fn new(schedule: ScheduleId, plan: SyncPlan) -> Self {
        Self {
            schedule,
            plan,
            cross_schedule: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailLink {
    pub reference: String,
    pub resolved: Option<NodeId>,
    pub display_name: Option<String>,
    pub link_type: LinkType,
    pub lag: i64,
}

/// What the detail editor shows for one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailView {
    pub node: NodeId,
    pub activity: Activity,
    pub graph_node: Option<GraphNode>,
    pub predecessors: Vec<DetailLink>,
    pub successors: Vec<DetailLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub node: NodeId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub primary: Option<NodeId>,
    pub written: Vec<NodeId>,
    pub deleted: Vec<NodeId>,
    /// Provisional activities changed in local state only.
    pub local: Vec<NodeId>,
    pub failures: Vec<CommitFailure>,
    pub conflicts: Vec<SyncConflict>,
    #[serde(skip)]
    secondary_attempted: usize,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.conflicts.is_empty()
    }

    /// Summarizes failed writes, or `None` when everything went through.
    /// Edits with a primary activity report on its successor links; merges
    /// have no primary and report on the propagated updates.
    pub fn partial_failure_message(&self) -> Option<String> {
        let failed = self.failures.len() + self.conflicts.len();
        if failed == 0 {
            return None;
        }
        let total = self.secondary_attempted + self.conflicts.len();
        Some(match self.primary {
            Some(_) => format!(
                "activity updated, but {} of {} successor links could not be updated",
                failed, total
            ),
            None => format!(
                "{} of {} propagated updates could not be applied",
                failed, total
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub provisional: NodeId,
    pub durable: NodeId,
    pub rewritten: usize,
}

/// One entry of a remote propagation result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PropagatedActivity {
    #[serde(alias = "recordId", alias = "id", alias = "name")]
    pub record_id: String,
    #[serde(default, alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, alias = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default, alias = "dependencies_json")]
    pub predecessors: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub matched: usize,
    pub unchanged: usize,
    pub unknown: Vec<String>,
}

#[derive(Debug)]
pub enum SessionError {
    UnknownSchedule(ScheduleId),
    UnknownNode(NodeId),
    UnknownEdge(String),
    CrossSchedule { source: NodeId, target: NodeId },
    InvalidDate(String),
    InvalidDuration(i64),
    Sync(SyncError),
    Promote(PromoteError),
    Store(StoreError),
    /// A promotion failed and undoing its store writes failed too; `dirty`
    /// lists the records still carrying the partial promotion.
    Rollback {
        cause: Box<SessionError>,
        dirty: Vec<NodeId>,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownSchedule(id) => write!(f, "unknown schedule '{}'", id),
            SessionError::UnknownNode(node) => write!(f, "unknown activity '{}'", node),
            SessionError::UnknownEdge(id) => write!(f, "unknown link '{}'", id),
            SessionError::CrossSchedule { source, target } => write!(
                f,
                "cannot link '{}' to '{}': links stay within one schedule",
                source, target
            ),
            SessionError::InvalidDate(raw) => {
                write!(f, "invalid date '{}': expected YYYY-MM-DD", raw)
            }
            SessionError::InvalidDuration(days) => write!(
                f,
                "invalid duration {}: expected 0 to {} days",
                days, MAX_DURATION_DAYS
            ),
            SessionError::Sync(err) => write!(f, "{}", err),
            SessionError::Promote(err) => write!(f, "{}", err),
            SessionError::Store(err) => write!(f, "{}", err),
            SessionError::Rollback { cause, dirty } => write!(
                f,
                "{}; undo failed, {} record(s) left changed: {}",
                cause,
                dirty.len(),
                dirty
                    .iter()
                    .map(NodeId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Sync(err) => Some(err),
            SessionError::Promote(err) => Some(err),
            SessionError::Store(err) => Some(err),
            SessionError::Rollback { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<SyncError> for SessionError {
    fn from(value: SyncError) -> Self {
        SessionError::Sync(value)
    }
}

impl From<PromoteError> for SessionError {
    fn from(value: PromoteError) -> Self {
        SessionError::Promote(value)
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        SessionError::Store(value)
    }
}

/// Owns the activity list and the graph derived from it.
///
/// The graph is only ever replaced by `rebuild`; planning methods never touch
/// state, and local state changes only for writes the store confirmed (or
/// for provisional activities, which live locally).
pub struct GraphSession {
    schedules: Vec<Schedule>,
    activities: Vec<Activity>,
    options: BuildOptions,
    graph: ScheduleGraph,
}

impl GraphSession {
    pub fn new(schedules: Vec<Schedule>, activities: Vec<Activity>, options: BuildOptions) -> Self {
        let mut session = Self {
            schedules,
            activities,
            options,
            graph: ScheduleGraph::default(),
        };
        session.rebuild();
        session
    }

    pub fn rebuild(&mut self) -> &ScheduleGraph {
        self.graph = build(&self.schedules, &self.activities, &self.options);
        &self.graph
    }

    pub fn graph(&self) -> &ScheduleGraph {
        &self.graph
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn provisional_activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities
            .iter()
            .filter(|activity| activity.key.is_provisional())
    }

    pub fn activity(&self, node: &NodeId) -> Result<&Activity, SessionError> {
        self.activities
            .iter()
            .find(|activity| activity.schedule_id == node.schedule && activity.key == node.key)
            .ok_or_else(|| SessionError::UnknownNode(node.clone()))
    }

    fn require_schedule(&self, id: &ScheduleId) -> Result<&Schedule, SessionError> {
        self.schedules
            .iter()
            .find(|schedule| &schedule.id == id)
            .ok_or_else(|| SessionError::UnknownSchedule(id.clone()))
    }

    fn scope(&self, schedule: &ScheduleId) -> Vec<Activity> {
        self.activities
            .iter()
            .filter(|activity| &activity.schedule_id == schedule)
            .cloned()
            .collect()
    }

    /// Adds a local-only activity and returns its node id.
    pub fn add_provisional(
        &mut self,
        schedule: &ScheduleId,
        seed: ProvisionalSeed,
    ) -> Result<NodeId, SessionError> {
        self.require_schedule(schedule)?;
        let existing = self
            .activities
            .iter()
            .filter(|activity| &activity.schedule_id == schedule)
            .map(|activity| activity.key.as_str().to_string())
            .collect::<Vec<_>>();
        let activity = provisional::create_provisional(schedule.clone(), seed, |candidate| {
            existing.iter().any(|key| key == candidate)
        });
        let node = activity.node_id();
        debug!(node = %node, "added provisional activity");
        self.activities.push(activity);
        self.rebuild();
        Ok(node)
    }

    pub fn detail(&self, node: &NodeId) -> Result<DetailView, SessionError> {
        let activity = self.activity(node)?;
        let scope = self.scope(&node.schedule);
        let sync = DependencySynchronizer::new(&scope);

        let predecessors = activity
            .predecessors()
            .into_iter()
            .map(|link| {
                let found = sync
                    .resolve(&link.predecessor)
                    .map(Activity::node_id)
                    .or_else(|| {
                        self.cross_schedule_edges(self.graph.incoming(node), node)
                            .find(|edge| edge.reference == link.predecessor)
                            .map(|edge| edge.source.clone())
                    });
                DetailLink {
                    display_name: found.as_ref().and_then(|found| self.display_name(found)),
                    resolved: found,
                    reference: link.predecessor,
                    link_type: link.link_type,
                    lag: link.lag,
                }
            })
            .collect();
        let mut successors = sync
            .successors_of(&node.key)?
            .into_iter()
            .map(|SuccessorLink { successor, link_type, lag }| {
                let display_name = sync
                    .activity(&successor.key)
                    .ok()
                    .map(|activity| activity.display_name.clone());
                DetailLink {
                    reference: successor.key.as_str().to_string(),
                    resolved: Some(successor),
                    display_name,
                    link_type,
                    lag,
                }
            })
            .collect::<Vec<_>>();
        successors.extend(
            self.cross_schedule_edges(self.graph.outgoing(node), node)
                .map(|edge| DetailLink {
                    reference: edge.target.key.as_str().to_string(),
                    resolved: Some(edge.target.clone()),
                    display_name: self.display_name(&edge.target),
                    link_type: edge.link_type,
                    lag: edge.lag,
                }),
        );

        Ok(DetailView {
            node: node.clone(),
            activity: activity.clone(),
            graph_node: self.graph.node(node).cloned(),
            predecessors,
            successors,
        })
    }

    /// Edges of `edges` that connect `node` to another schedule. Empty unless
    /// cross-schedule resolution is on.
    fn cross_schedule_edges<'a>(
        &self,
        edges: impl Iterator<Item = &'a GraphEdge> + 'a,
        node: &'a NodeId,
    ) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        let enabled = self.options.cross_schedule_links;
        edges.filter(move |edge| {
            enabled
                && (edge.source.schedule != node.schedule
                    || edge.target.schedule != node.schedule)
        })
    }

    fn display_name(&self, node: &NodeId) -> Option<String> {
        self.activity(node)
            .ok()
            .map(|activity| activity.display_name.clone())
    }

    pub fn plan_event(&self, event: &WidgetEvent) -> Result<EventOutcome, SessionError> {
        let planned = match event {
            WidgetEvent::DateChanged {
                node,
                start_date,
                duration,
            } => self.plan_date_change(node, start_date, *duration)?,
            WidgetEvent::LinkAdded { source, target } => {
                self.plan_link_added(source, target, LinkType::default(), 0)?
            }
            WidgetEvent::LinkRemoved { edge_id } => self.plan_link_removed(edge_id)?,
            WidgetEvent::NodeDeleted { node } => self.plan_node_deleted(node)?,
            WidgetEvent::NodeClicked { node } => {
                return Ok(EventOutcome::Detail(Box::new(self.detail(node)?)));
            }
        };
        Ok(EventOutcome::Edit(planned))
    }

    /// New start date (and optionally duration). The stored end date follows
    /// as `start + duration - 1`.
    pub fn plan_date_change(
        &self,
        node: &NodeId,
        start_date: &str,
        duration: Option<i64>,
    ) -> Result<PlannedEdit, SessionError> {
        let activity = self.activity(node)?;
        let start =
            parse_date(start_date).ok_or_else(|| SessionError::InvalidDate(start_date.to_string()))?;
        if let Some(days) = duration.filter(|days| !duration_in_range(*days)) {
            return Err(SessionError::InvalidDuration(days));
        }
        let span = duration
            .filter(|days| *days > 0)
            .or(activity.duration.filter(|days| *days > 0))
            .or_else(|| self.graph.node(node).map(|projected| projected.duration))
            .unwrap_or(self.options.default_duration_days);

        let mut plan = SyncPlan::for_activity(node.key.clone());
        plan.update(
            node.key.clone(),
            ActivityPatch {
                start_date: Some(format_date(start)),
                end_date: Some(format_date(derive_end_date(start, span))),
                duration,
                ..ActivityPatch::default()
            },
        );
        Ok(PlannedEdit::new(node.schedule.clone(), plan))
    }

    pub fn plan_link_added(
        &self,
        source: &NodeId,
        target: &NodeId,
        link_type: LinkType,
        lag: i64,
    ) -> Result<PlannedEdit, SessionError> {
        self.activity(source)?;
        self.activity(target)?;
        if source.schedule != target.schedule {
            return Err(SessionError::CrossSchedule {
                source: source.clone(),
                target: target.clone(),
            });
        }
        let scope = self.scope(&target.schedule);
        let plan = DependencySynchronizer::new(&scope).add_link(&source.key, &target.key, link_type, lag)?;
        Ok(PlannedEdit::new(target.schedule.clone(), plan))
    }

    pub fn plan_link_removed(&self, edge_id: &str) -> Result<PlannedEdit, SessionError> {
        let edge = self
            .graph
            .edge(edge_id)
            .ok_or_else(|| SessionError::UnknownEdge(edge_id.to_string()))?;
        if edge.source.schedule == edge.target.schedule {
            let scope = self.scope(&edge.target.schedule);
            let plan = DependencySynchronizer::new(&scope)
                .remove_link(&edge.source.key, &edge.target.key)?;
            return Ok(PlannedEdit::new(edge.target.schedule.clone(), plan));
        }

        // cross-schedule edge: the target holds the reference verbatim
        let target = self.activity(&edge.target)?;
        let kept = target
            .predecessors()
            .into_iter()
            .filter(|link| link.predecessor != edge.reference)
            .collect::<Vec<_>>();
        let mut plan = SyncPlan::for_activity(target.key.clone());
        plan.update(
            target.key.clone(),
            ActivityPatch::predecessors(codec::encode(&kept)),
        );
        Ok(PlannedEdit::new(edge.target.schedule.clone(), plan))
    }

    /// Deletes `node` and strips it from its successors, including those in
    /// other schedules that reach it through `linkedDocumentId`.
    pub fn plan_node_deleted(&self, node: &NodeId) -> Result<PlannedEdit, SessionError> {
        self.activity(node)?;
        let scope = self.scope(&node.schedule);
        let plan = DependencySynchronizer::new(&scope).remove_activity(&node.key)?;
        let mut edit = PlannedEdit::new(node.schedule.clone(), plan);
        for edge in self.cross_schedule_edges(self.graph.outgoing(node), node) {
            let successor = self.activity(&edge.target)?;
            let kept = successor
                .predecessors()
                .into_iter()
                .filter(|link| link.predecessor.trim() != edge.reference.trim())
                .collect::<Vec<_>>();
            edit.cross_schedule.push((
                edge.target.clone(),
                ActivityPatch::predecessors(codec::encode(&kept)),
            ));
        }
        Ok(edit)
    }

    pub fn plan_predecessor_edit(
        &self,
        node: &NodeId,
        predecessors: Vec<PredecessorLink>,
    ) -> Result<PlannedEdit, SessionError> {
        self.plan_detail_save(node, Some(predecessors), None)
    }

    pub fn plan_successor_edit(
        &self,
        node: &NodeId,
        successors: Vec<SuccessorEdit>,
    ) -> Result<PlannedEdit, SessionError> {
        self.plan_detail_save(node, None, Some(successors))
    }

    /// Saves both tabs of the detail editor. The successor edit is computed on
    /// top of the predecessor edit so neither discards the other.
    pub fn plan_detail_save(
        &self,
        node: &NodeId,
        predecessors: Option<Vec<PredecessorLink>>,
        successors: Option<Vec<SuccessorEdit>>,
    ) -> Result<PlannedEdit, SessionError> {
        self.activity(node)?;
        let mut working = self.scope(&node.schedule);
        let mut plan = SyncPlan::for_activity(node.key.clone());

        if let Some(predecessors) = predecessors {
            let step = DependencySynchronizer::new(&working)
                .apply_predecessor_edit(&node.key, predecessors)?;
            apply_to(&mut working, &step);
            plan = plan.then(step);
        }
        if let Some(successors) = successors {
            let step =
                DependencySynchronizer::new(&working).apply_successor_edit(&node.key, successors)?;
            plan = plan.then(step);
        }

        Ok(PlannedEdit::new(node.schedule.clone(), plan))
    }

    /// Turns a remote propagation result into a plan. Entries for unknown
    /// record ids are reported, not applied.
    pub fn plan_merge(
        &self,
        schedule: &ScheduleId,
        updates: &[PropagatedActivity],
    ) -> Result<(PlannedEdit, MergeSummary), SessionError> {
        self.require_schedule(schedule)?;
        let mut plan = SyncPlan::default();
        let mut summary = MergeSummary::default();

        for update in updates {
            let record_id = update.record_id.trim();
            let Some(activity) = self.activities.iter().find(|activity| {
                &activity.schedule_id == schedule && activity.key.as_str() == record_id
            }) else {
                summary.unknown.push(record_id.to_string());
                continue;
            };

            if let Some(days) = update.duration.filter(|days| !duration_in_range(*days)) {
                return Err(SessionError::InvalidDuration(days));
            }
            let mut patch = ActivityPatch {
                start_date: normalize_date(update.start_date.as_deref()),
                end_date: normalize_date(update.end_date.as_deref()),
                duration: update.duration,
                ..ActivityPatch::default()
            };
            if let Some(payload) = &update.predecessors {
                let links = match payload {
                    Value::String(raw) => codec::decode(Some(raw)),
                    other => codec::decode_value(other),
                };
                patch.predecessors_raw = Some(codec::encode(&links));
            }

            let mut merged = activity.clone();
            merged.apply_patch(&patch);
            summary.matched += 1;
            if &merged == activity {
                summary.unchanged += 1;
                continue;
            }
            plan.update(activity.key.clone(), patch);
        }

        Ok((
            PlannedEdit::new(schedule.clone(), plan),
            summary,
        ))
    }

    /// Writes a plan through `store`: the primary activity first, the rest only
    /// once it is accepted. A rejected primary write aborts with nothing
    /// changed; later failures are collected in the report.
    pub fn commit<S>(&mut self, store: &mut S, edit: PlannedEdit) -> Result<CommitReport, SessionError>
    where
        S: DocumentStore + ?Sized,
    {
        let PlannedEdit {
            schedule,
            plan,
            cross_schedule,
        } = edit;
        let node_of = |key: &ActivityKey| NodeId::new(schedule.clone(), key.clone());
        let mut report = CommitReport {
            primary: plan.primary.as_ref().map(node_of),
            conflicts: plan.conflicts.clone(),
            ..CommitReport::default()
        };

        if let Some(primary) = &plan.primary {
            if plan.deletions.contains(primary) {
                self.write_delete(store, &schedule, primary, &mut report)?;
            } else if let Some(patch) = plan.updates.get(primary) {
                self.write_update(store, &schedule, primary, patch, &mut report)?;
            }
        }

        for (key, patch) in plan.secondary_updates() {
            report.secondary_attempted += 1;
            if let Err(err) = self.write_update(store, &schedule, key, patch, &mut report) {
                warn!(node = %node_of(key), error = %err, "successor update failed");
                report.failures.push(CommitFailure {
                    node: node_of(key),
                    message: err.to_string(),
                });
            }
        }
        for key in plan
            .deletions
            .iter()
            .filter(|key| Some(*key) != plan.primary.as_ref())
        {
            if let Err(err) = self.write_delete(store, &schedule, key, &mut report) {
                report.failures.push(CommitFailure {
                    node: node_of(key),
                    message: err.to_string(),
                });
            }
        }
        for (node, patch) in &cross_schedule {
            report.secondary_attempted += 1;
            if let Err(err) = self.write_update(store, &node.schedule, &node.key, patch, &mut report) {
                warn!(node = %node, error = %err, "cross-schedule update failed");
                report.failures.push(CommitFailure {
                    node: node.clone(),
                    message: err.to_string(),
                });
            }
        }

        self.rebuild();
        info!(
            schedule = %schedule,
            written = report.written.len(),
            deleted = report.deleted.len(),
            local = report.local.len(),
            failures = report.failures.len(),
            conflicts = report.conflicts.len(),
            "committed edit"
        );
        Ok(report)
    }

    fn position(&self, schedule: &ScheduleId, key: &ActivityKey) -> Option<usize> {
        self.activities
            .iter()
            .position(|activity| &activity.schedule_id == schedule && &activity.key == key)
    }

    fn write_update<S>(
        &mut self,
        store: &mut S,
        schedule: &ScheduleId,
        key: &ActivityKey,
        patch: &ActivityPatch,
        report: &mut CommitReport,
    ) -> Result<(), SessionError>
    where
        S: DocumentStore + ?Sized,
    {
        let node = NodeId::new(schedule.clone(), key.clone());
        let index = self
            .position(schedule, key)
            .ok_or_else(|| SessionError::UnknownNode(node.clone()))?;
        match key {
            ActivityKey::Provisional(_) => report.local.push(node),
            ActivityKey::Durable(record_id) => {
                store.update_activity(schedule, record_id, patch)?;
                report.written.push(node);
            }
        }
        self.activities[index].apply_patch(patch);
        Ok(())
    }

    fn write_delete<S>(
        &mut self,
        store: &mut S,
        schedule: &ScheduleId,
        key: &ActivityKey,
        report: &mut CommitReport,
    ) -> Result<(), SessionError>
    where
        S: DocumentStore + ?Sized,
    {
        let node = NodeId::new(schedule.clone(), key.clone());
        let index = self
            .position(schedule, key)
            .ok_or_else(|| SessionError::UnknownNode(node.clone()))?;
        if let ActivityKey::Durable(record_id) = key {
            store.delete_activity(schedule, record_id)?;
        }
        self.activities.remove(index);
        report.deleted.push(node);
        Ok(())
    }

    /// Creates the provisional activity in the store and switches every
    /// reference to the assigned record id. Store writes are undone if any
    /// of them fails, and local state only changes once all succeeded.
    pub fn promote<S>(&mut self, store: &mut S, node: &NodeId) -> Result<PromotionReport, SessionError>
    where
        S: DocumentStore + ?Sized,
    {
        let activity = self.activity(node)?.clone();
        if !activity.key.is_provisional() {
            return Err(PromoteError::NotProvisional(node.clone()).into());
        }

        let record_id = store.create_activity(&activity)?;
        let plan = match provisional::promote(&self.activities, node, &record_id) {
            Ok(plan) => plan,
            Err(err) => {
                let dirty = undo_promotion(store, &node.schedule, &record_id, &[]);
                return Err(rolled_back(err.into(), dirty));
            }
        };

        let mut applied: Vec<(String, ActivityPatch)> = Vec::new();
        let mut pending: Vec<(String, ActivityPatch, ActivityPatch)> = Vec::new();
        for (key, links) in &plan.predecessor_rewrites {
            if let ActivityKey::Durable(record) = key {
                let before = self.activity(&NodeId::new(node.schedule.clone(), key.clone()))?;
                pending.push((
                    record.clone(),
                    ActivityPatch::predecessors(codec::encode(links)),
                    ActivityPatch::predecessors(
                        before.predecessors_raw.clone().unwrap_or_else(|| "[]".to_string()),
                    ),
                ));
            }
        }
        for key in &plan.parent_rewrites {
            if let ActivityKey::Durable(record) = key {
                pending.push((
                    record.clone(),
                    ActivityPatch {
                        parent_key: Some(record_id.clone()),
                        ..ActivityPatch::default()
                    },
                    ActivityPatch {
                        parent_key: Some(node.key.as_str().to_string()),
                        ..ActivityPatch::default()
                    },
                ));
            }
        }

        for (record, patch, undo) in pending {
            if let Err(err) = store.update_activity(&node.schedule, &record, &patch) {
                warn!(node = %node, error = %err, "promotion failed; undoing store writes");
                let dirty = undo_promotion(store, &node.schedule, &record_id, &applied);
                return Err(rolled_back(err.into(), dirty));
            }
            applied.push((record, undo));
        }

        plan.apply(&mut self.activities)?;
        self.rebuild();
        info!(provisional = %plan.provisional, durable = %plan.durable, rewritten = plan.touched(), "promoted activity");
        Ok(PromotionReport {
            provisional: plan.provisional.clone(),
            durable: plan.durable.clone(),
            rewritten: plan.touched(),
        })
    }
}

/// Reverts applied reference rewrites (newest first) and deletes the created
/// record. Returns the records that could not be reverted.
fn undo_promotion<S>(
    store: &mut S,
    schedule: &ScheduleId,
    record_id: &str,
    applied: &[(String, ActivityPatch)],
) -> Vec<NodeId>
where
    S: DocumentStore + ?Sized,
{
    let mut dirty = Vec::new();
    for (record, undo) in applied.iter().rev() {
        if let Err(err) = store.update_activity(schedule, record, undo) {
            let node = NodeId::new(schedule.clone(), ActivityKey::Durable(record.clone()));
            warn!(node = %node, error = %err, "could not restore references");
            dirty.push(node);
        }
    }
    if let Err(err) = store.delete_activity(schedule, record_id) {
        let node = NodeId::new(schedule.clone(), ActivityKey::Durable(record_id.to_string()));
        warn!(node = %node, error = %err, "could not delete promoted record");
        dirty.push(node);
    }
    dirty
}

fn rolled_back(cause: SessionError, dirty: Vec<NodeId>) -> SessionError {
    if dirty.is_empty() {
        cause
    } else {
        SessionError::Rollback {
            cause: Box::new(cause),
            dirty,
        }
    }
}

fn apply_to(activities: &mut Vec<Activity>, plan: &SyncPlan) {
    activities.retain(|activity| !plan.deletions.contains(&activity.key));
    for activity in activities.iter_mut() {
        if let Some(patch) = plan.updates.get(&activity.key) {
            activity.apply_patch(patch);
        }
    }
}
