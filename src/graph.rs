use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::activity::{Activity, Schedule, ScheduleRole};
use crate::domain::dates::{derive_duration, derive_end_date, format_date, parse_date};
use crate::domain::link::{LinkType, PredecessorLink};
use crate::domain::node_id::{NodeId, ScheduleId};
use crate::resolver::{Resolution, ResolutionIndex, ResolutionTier, Resolvable};

pub const DEFAULT_MASTER_COLOR: &str = "#64748b";
pub const DEFAULT_OVERLAY_COLORS: [&str; 4] = ["#3b82f6", "#ef4444", "#10b981", "#f59e0b"];
pub const DEFAULT_DURATION_DAYS: i64 = 1;

const WIDGET_ROOT: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Let a reference that misses in its own schedule resolve through
    /// `linkedDocumentId` in another schedule.
    pub cross_schedule_links: bool,
    pub master_color: String,
    pub overlay_colors: Vec<String>,
    pub default_duration_days: i64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cross_schedule_links: false,
            master_color: DEFAULT_MASTER_COLOR.to_string(),
            overlay_colors: DEFAULT_OVERLAY_COLORS
                .iter()
                .map(|color| color.to_string())
                .collect(),
            default_duration_days: DEFAULT_DURATION_DAYS,
        }
    }
}

impl BuildOptions {
    fn overlay_color(&self, overlay_index: usize) -> String {
        if self.overlay_colors.is_empty() {
            return self.master_color.clone();
        }
        self.overlay_colors[overlay_index % self.overlay_colors.len()].clone()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub label: String,
    pub display_name: String,
    pub role: ScheduleRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_document_id: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub duration: i64,
    pub color: String,
    /// Predecessors that resolved to a current node, in stored order.
    pub resolved_predecessors: Vec<NodeId>,
    #[serde(skip)]
    parent_key: Option<String>,
    #[serde(skip)]
    predecessors: Vec<PredecessorLink>,
}

impl GraphNode {
    pub fn schedule(&self) -> &ScheduleId {
        &self.id.schedule
    }
}

impl Resolvable for GraphNode {
    fn node_id(&self) -> NodeId {
        self.id.clone()
    }

    fn local_key(&self) -> &str {
        self.id.key.as_str()
    }

    fn linked_document_id(&self) -> Option<&str> {
        self.linked_document_id.as_deref()
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub link_type: LinkType,
    pub lag: i64,
    /// The stored reference this edge was resolved from.
    pub reference: String,
    pub tier: ResolutionTier,
}

impl GraphEdge {
    pub fn edge_id(source: &NodeId, target: &NodeId) -> String {
        format!("{}->{}", source, target)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Unresolved,
    SelfReference,
    Duplicate,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Unresolved => "unresolved",
            DropReason::SelfReference => "self_reference",
            DropReason::Duplicate => "duplicate",
        }
    }
}

/// A stored predecessor reference that produced no edge. The activity's
/// stored payload still carries it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DroppedReference {
    pub target: NodeId,
    pub reference: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedActivity {
    pub node: NodeId,
    pub display_name: String,
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScheduleGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub dropped: Vec<DroppedReference>,
    pub skipped: Vec<SkippedActivity>,
}

impl ScheduleGraph {
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |edge| &edge.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |edge| &edge.source == id)
    }

    pub fn children<'a>(
        &'a self,
        parent: Option<&'a NodeId>,
    ) -> impl Iterator<Item = &'a GraphNode> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.parent.as_ref() == parent)
    }

    /// The node/link schema the Gantt widget consumes.
    pub fn to_widget(&self) -> WidgetPayload {
        WidgetPayload {
            data: self
                .nodes
                .iter()
                .map(|node| WidgetTask {
                    id: node.id.to_string(),
                    parent_id: node
                        .parent
                        .as_ref()
                        .map_or_else(|| WIDGET_ROOT.to_string(), NodeId::to_string),
                    label: node.label.clone(),
                    start_date: node.start_date.clone(),
                    duration: node.duration,
                    color: node.color.clone(),
                })
                .collect(),
            links: self
                .edges
                .iter()
                .map(|edge| WidgetLink {
                    id: edge.id.clone(),
                    source: edge.source.to_string(),
                    target: edge.target.to_string(),
                    link_type: edge.link_type.widget_code(),
                    lag: edge.lag,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WidgetPayload {
    pub data: Vec<WidgetTask>,
    pub links: Vec<WidgetLink>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetTask {
    pub id: String,
    pub parent_id: String,
    pub label: String,
    pub start_date: String,
    pub duration: i64,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WidgetLink {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: &'static str,
    pub lag: i64,
}

/// Projects the activities of `schedules` into nodes and resolved edges.
///
/// Activities whose schedule is not listed are ignored. The order of
/// `schedules` decides overlay colors.
pub fn build(schedules: &[Schedule], activities: &[Activity], options: &BuildOptions) -> ScheduleGraph {
    let (mut nodes, skipped) = node_pass(schedules, activities, options);
    assign_parents(&mut nodes);
    let (edges, dropped) = edge_pass(&nodes, options);

    let positions = nodes
        .iter()
        .enumerate()
        .map(|(position, node)| (node.id.clone(), position))
        .collect::<HashMap<_, _>>();
    for edge in &edges {
        if let Some(position) = positions.get(&edge.target) {
            nodes[*position].resolved_predecessors.push(edge.source.clone());
        }
    }

    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        dropped = dropped.len(),
        skipped = skipped.len(),
        "built schedule graph"
    );
    ScheduleGraph {
        nodes,
        edges,
        dropped,
        skipped,
    }
}

fn node_pass(
    schedules: &[Schedule],
    activities: &[Activity],
    options: &BuildOptions,
) -> (Vec<GraphNode>, Vec<SkippedActivity>) {
    let mut nodes = Vec::with_capacity(activities.len());
    let mut skipped = Vec::new();
    let mut seen_schedules = HashSet::new();
    let mut seen_nodes = HashSet::new();
    let mut overlay_index = 0usize;

    for schedule in schedules {
        if !seen_schedules.insert(&schedule.id) {
            continue;
        }
        let color = match schedule.role {
            ScheduleRole::Master => options.master_color.clone(),
            ScheduleRole::Overlay => {
                let color = options.overlay_color(overlay_index);
                overlay_index += 1;
                color
            }
        };

        for activity in activities
            .iter()
            .filter(|activity| activity.schedule_id == schedule.id)
        {
            let id = activity.node_id();
            if seen_nodes.contains(&id) {
                warn!(node = %id, "ignoring activity with a repeated storage key");
                continue;
            }
            match project(activity, schedule.role, &color, options) {
                Some(node) => {
                    seen_nodes.insert(id);
                    nodes.push(node);
                }
                None => {
                    warn!(
                        node = %id,
                        start_date = activity.start_date.as_deref().unwrap_or(""),
                        "skipping activity without a usable start date"
                    );
                    skipped.push(SkippedActivity {
                        node: id,
                        display_name: activity.display_name.clone(),
                        start_date: activity.start_date.clone(),
                    });
                }
            }
        }
    }

    (nodes, skipped)
}

fn project(
    activity: &Activity,
    role: ScheduleRole,
    color: &str,
    options: &BuildOptions,
) -> Option<GraphNode> {
    let start = activity.start_date.as_deref().and_then(parse_date)?;
    let end = activity
        .end_date
        .as_deref()
        .and_then(parse_date)
        .filter(|end| *end >= start);

    let duration = match activity.duration {
        Some(duration) if duration > 0 => duration,
        _ => end
            .map(|end| derive_duration(start, end))
            .filter(|days| *days > 0)
            .unwrap_or(options.default_duration_days.max(1)),
    };
    let end = end.unwrap_or_else(|| derive_end_date(start, duration));

    let label = match role {
        ScheduleRole::Master => activity.display_name.clone(),
        ScheduleRole::Overlay => format!("{} ({})", activity.display_name, activity.schedule_id),
    };

    Some(GraphNode {
        id: activity.node_id(),
        parent: None,
        label,
        display_name: activity.display_name.clone(),
        role,
        linked_document_id: activity.linked_document_id.clone(),
        start_date: format_date(start),
        end_date: format_date(end),
        duration,
        color: color.to_string(),
        resolved_predecessors: Vec::new(),
        parent_key: activity.parent_key.clone(),
        predecessors: activity.predecessors(),
    })
}

/// Overlay nodes group under the master node of the same name, falling back
/// to their own `parentKey`; master nodes use `parentKey` only. Anything that
/// does not resolve, or that would close a loop, stays at the root.
fn assign_parents(nodes: &mut [GraphNode]) {
    let mut master_by_name: HashMap<String, NodeId> = HashMap::new();
    let mut by_key: HashMap<(ScheduleId, String), NodeId> = HashMap::new();
    for node in nodes.iter() {
        if node.role == ScheduleRole::Master {
            let name = node.display_name.trim();
            if !name.is_empty() {
                master_by_name
                    .entry(name.to_string())
                    .or_insert_with(|| node.id.clone());
            }
        }
        by_key
            .entry((node.id.schedule.clone(), node.id.key.as_str().to_string()))
            .or_insert_with(|| node.id.clone());
    }

    let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
    for node in nodes.iter() {
        let grouped = match node.role {
            ScheduleRole::Overlay => master_by_name.get(node.display_name.trim()).cloned(),
            ScheduleRole::Master => None,
        };
        let own = node
            .parent_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .and_then(|key| by_key.get(&(node.id.schedule.clone(), key.to_string())))
            .cloned();
        if let Some(parent) = grouped.or(own).filter(|parent| parent != &node.id) {
            parents.insert(node.id.clone(), parent);
        }
    }

    for node in nodes.iter() {
        if closes_loop(&parents, &node.id) {
            debug!(node = %node.id, "parent chain loops back; placing node at root");
            parents.remove(&node.id);
        }
    }

    for node in nodes.iter_mut() {
        node.parent = parents.get(&node.id).cloned();
    }
}

fn closes_loop(parents: &HashMap<NodeId, NodeId>, start: &NodeId) -> bool {
    let mut seen = HashSet::new();
    let mut current = start;
    while let Some(parent) = parents.get(current) {
        if parent == start {
            return true;
        }
        if !seen.insert(parent) {
            return false;
        }
        current = parent;
    }
    false
}

fn edge_pass(nodes: &[GraphNode], options: &BuildOptions) -> (Vec<GraphEdge>, Vec<DroppedReference>) {
    let mut per_schedule: HashMap<&ScheduleId, ResolutionIndex> = HashMap::new();
    for node in nodes {
        per_schedule
            .entry(node.schedule())
            .or_default()
            .insert(node);
    }
    let global = if options.cross_schedule_links {
        ResolutionIndex::new(nodes)
    } else {
        ResolutionIndex::default()
    };

    let mut edges = Vec::new();
    let mut dropped = Vec::new();
    let mut seen = HashSet::new();

    for target in nodes {
        for link in &target.predecessors {
            let local = per_schedule
                .get(target.schedule())
                .and_then(|index| index.resolve_with_tier(&link.predecessor));
            let resolution = local.or_else(|| {
                global
                    .resolve_linked(&link.predecessor)
                    .map(|node| Resolution {
                        node,
                        tier: ResolutionTier::LinkedDocument,
                    })
            });

            let Some(Resolution { node: source, tier }) = resolution else {
                debug!(target = %target.id, reference = %link.predecessor, "predecessor did not resolve");
                dropped.push(DroppedReference {
                    target: target.id.clone(),
                    reference: link.predecessor.clone(),
                    reason: DropReason::Unresolved,
                });
                continue;
            };
            if tier != ResolutionTier::Direct {
                debug!(
                    target = %target.id,
                    reference = %link.predecessor,
                    source = %source,
                    tier = tier.as_str(),
                    "predecessor resolved through fallback"
                );
            }

            let reason = if source == target.id {
                Some(DropReason::SelfReference)
            } else if !seen.insert((source.clone(), target.id.clone())) {
                Some(DropReason::Duplicate)
            } else {
                None
            };
            if let Some(reason) = reason {
                debug!(target = %target.id, reference = %link.predecessor, reason = reason.as_str(), "dropping edge");
                dropped.push(DroppedReference {
                    target: target.id.clone(),
                    reference: link.predecessor.clone(),
                    reason,
                });
                continue;
            }

            edges.push(GraphEdge {
                id: GraphEdge::edge_id(&source, &target.id),
                source,
                target: target.id.clone(),
                link_type: link.link_type,
                lag: link.lag,
                reference: link.predecessor.clone(),
                tier,
            });
        }
    }

    (edges, dropped)
}
