use std::collections::HashSet;

use serde::Serialize;

use crate::codec;
use crate::domain::activity::{Activity, Schedule};
use crate::domain::dates::parse_date;
use crate::domain::node_id::{NodeId, ScheduleId};
use crate::resolver::{ResolutionIndex, ResolutionTier};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    MalformedPayload,
    MissingStartDate,
    UnresolvedReference,
    DuplicateReference,
    SelfReference,
    AmbiguousName,
}

impl CheckKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::MalformedPayload => "malformed_payload",
            CheckKind::MissingStartDate => "missing_start_date",
            CheckKind::UnresolvedReference => "unresolved_reference",
            CheckKind::DuplicateReference => "duplicate_reference",
            CheckKind::SelfReference => "self_reference",
            CheckKind::AmbiguousName => "ambiguous_name",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckIssue {
    pub schedule: ScheduleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    pub kind: CheckKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckReport {
    pub activities_scanned: u64,
    pub issues: Vec<CheckIssue>,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, kind: CheckKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind == kind).count()
    }
}

/// Looks for data the graph builder silently tolerates. References are
/// checked within their own schedule only.
pub fn run_check(schedules: &[Schedule], activities: &[Activity]) -> CheckReport {
    let mut issues = Vec::new();
    let mut scanned = 0u64;

    for schedule in schedules {
        let scope = activities
            .iter()
            .filter(|activity| activity.schedule_id == schedule.id)
            .collect::<Vec<_>>();
        let index = ResolutionIndex::new(scope.iter().copied());

        for activity in &scope {
            scanned += 1;
            check_activity(activity, &index, &mut issues);
        }

        for (name, count) in index.ambiguous_names() {
            issues.push(CheckIssue {
                schedule: schedule.id.clone(),
                node: None,
                kind: CheckKind::AmbiguousName,
                message: format!(
                    "display name '{}' is shared by {} activities; name references pick the first",
                    name, count
                ),
            });
        }
    }

    CheckReport {
        activities_scanned: scanned,
        issues,
    }
}

fn check_activity(activity: &Activity, index: &ResolutionIndex, issues: &mut Vec<CheckIssue>) {
    let node = activity.node_id();
    let mut report = |kind: CheckKind, message: String| {
        issues.push(CheckIssue {
            schedule: activity.schedule_id.clone(),
            node: Some(node.clone()),
            kind,
            message,
        });
    };

    if activity
        .start_date
        .as_deref()
        .and_then(parse_date)
        .is_none()
    {
        report(
            CheckKind::MissingStartDate,
            match activity.start_date.as_deref() {
                Some(raw) => format!("start date '{}' is not a calendar date", raw),
                None => "no start date; the activity is left out of the graph".to_string(),
            },
        );
    }

    if let Err(err) = codec::try_decode(activity.predecessors_raw.as_deref()) {
        report(CheckKind::MalformedPayload, err.to_string());
    }

    let mut seen = HashSet::new();
    for link in activity.predecessors() {
        let Some(resolution) = index.resolve_with_tier(&link.predecessor) else {
            report(
                CheckKind::UnresolvedReference,
                format!("predecessor '{}' does not match any activity", link.predecessor),
            );
            continue;
        };
        if resolution.node == node {
            report(
                CheckKind::SelfReference,
                format!("predecessor '{}' refers to the activity itself", link.predecessor),
            );
            continue;
        }
        if !seen.insert(resolution.node.clone()) {
            report(
                CheckKind::DuplicateReference,
                format!(
                    "predecessor '{}' repeats a link to '{}'",
                    link.predecessor, resolution.node
                ),
            );
        }
        if resolution.tier == ResolutionTier::DisplayName {
            tracing::debug!(
                node = %node,
                reference = %link.predecessor,
                "predecessor resolved by display name"
            );
        }
    }
}
