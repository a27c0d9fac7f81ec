use std::error::Error;
use std::fmt;

use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::codec;
use crate::domain::activity::Activity;
use crate::domain::dates::{derive_end_date, format_date, parse_date};
use crate::domain::link::PredecessorLink;
use crate::domain::node_id::{ActivityKey, NodeId, ScheduleId};

const PROVISIONAL_PREFIX: &str = "new";

/// Fields a user supplies when adding an activity before it is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionalSeed {
    pub display_name: String,
    pub linked_document_id: Option<String>,
    pub parent_key: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration: Option<i64>,
    pub predecessors: Vec<PredecessorLink>,
}

/// Creates a local-only activity with a fresh provisional key.
pub fn create_provisional<F>(schedule: ScheduleId, seed: ProvisionalSeed, exists: F) -> Activity
where
    F: FnMut(&str) -> bool,
{
    let key = generate_provisional_key(&seed.display_name, exists);
    let mut activity = Activity::new(ActivityKey::Provisional(key), schedule, seed.display_name);
    activity.linked_document_id = seed.linked_document_id;
    activity.parent_key = seed.parent_key;
    activity.duration = seed.duration;
    activity.start_date = seed.start_date;
    activity.end_date = seed.end_date.or_else(|| {
        let start = activity.start_date.as_deref().and_then(parse_date)?;
        let duration = activity.duration.filter(|days| *days > 0)?;
        Some(format_date(derive_end_date(start, duration)))
    });
    if !seed.predecessors.is_empty() {
        activity.predecessors_raw = Some(codec::encode(&seed.predecessors));
    }
    activity
}

fn generate_provisional_key<F>(seed: &str, mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    for _ in 0..64 {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(Uuid::now_v7().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let candidate = format!("{}-{}", PROVISIONAL_PREFIX, &digest[..8]);
        if !exists(&candidate) {
            return candidate;
        }
    }

    format!("{}-{}", PROVISIONAL_PREFIX, Uuid::now_v7().simple())
}

/// Everything that has to change when a provisional activity gets its record
/// id. Applied as a whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    pub provisional: NodeId,
    pub durable: NodeId,
    /// Activities whose predecessor list referenced the provisional key,
    /// with their rewritten lists.
    pub predecessor_rewrites: Vec<(ActivityKey, Vec<PredecessorLink>)>,
    /// Activities whose `parentKey` was the provisional key.
    pub parent_rewrites: Vec<ActivityKey>,
}

impl RewritePlan {
    pub fn touched(&self) -> usize {
        self.predecessor_rewrites.len() + self.parent_rewrites.len()
    }

    /// Applies the plan to `activities`. Every target is checked before anything
    /// is written, so a stale plan leaves `activities` untouched.
    pub fn apply(&self, activities: &mut [Activity]) -> Result<(), PromoteError> {
        let schedule = &self.provisional.schedule;
        let position = |activities: &[Activity], key: &ActivityKey| {
            activities
                .iter()
                .position(|activity| &activity.schedule_id == schedule && &activity.key == key)
        };

        let owner = position(activities, &self.provisional.key)
            .ok_or_else(|| PromoteError::UnknownActivity(self.provisional.clone()))?;
        if position(activities, &self.durable.key).is_some() {
            return Err(PromoteError::DurableIdInUse(self.durable.clone()));
        }
        let mut rewrites = Vec::with_capacity(self.predecessor_rewrites.len());
        for (key, links) in &self.predecessor_rewrites {
            let index = position(activities, key).ok_or_else(|| PromoteError::StalePlan(key.clone()))?;
            rewrites.push((index, codec::encode(links)));
        }
        let mut parents = Vec::with_capacity(self.parent_rewrites.len());
        for key in &self.parent_rewrites {
            parents.push(position(activities, key).ok_or_else(|| PromoteError::StalePlan(key.clone()))?);
        }

        activities[owner].key = self.durable.key.clone();
        for (index, raw) in rewrites {
            activities[index].predecessors_raw = Some(raw);
        }
        for index in parents {
            activities[index].parent_key = Some(self.durable.key.as_str().to_string());
        }
        Ok(())
    }
}

/// Plans the switch of a provisional activity to `durable_id`.
///
/// Predecessor references are rewritten when they name the provisional key
/// exactly, either bare or as a full node id.
pub fn promote(
    activities: &[Activity],
    provisional: &NodeId,
    durable_id: &str,
) -> Result<RewritePlan, PromoteError> {
    let durable_id = durable_id.trim();
    if durable_id.is_empty() {
        return Err(PromoteError::EmptyDurableId);
    }
    if !provisional.is_provisional() {
        return Err(PromoteError::NotProvisional(provisional.clone()));
    }
    if !activities
        .iter()
        .any(|activity| &activity.node_id() == provisional)
    {
        return Err(PromoteError::UnknownActivity(provisional.clone()));
    }
    let durable = NodeId::new(
        provisional.schedule.clone(),
        ActivityKey::Durable(durable_id.to_string()),
    );
    if activities.iter().any(|activity| {
        activity.schedule_id == provisional.schedule && activity.key.as_str() == durable_id
    }) {
        return Err(PromoteError::DurableIdInUse(durable));
    }

    let bare = provisional.key.as_str();
    let qualified = provisional.to_string();
    let mut predecessor_rewrites = Vec::new();
    let mut parent_rewrites = Vec::new();

    for activity in activities
        .iter()
        .filter(|activity| activity.schedule_id == provisional.schedule)
    {
        let mut links = activity.predecessors();
        let mut changed = false;
        for link in links.iter_mut() {
            if link.predecessor == bare || link.predecessor == qualified {
                link.predecessor = durable_id.to_string();
                changed = true;
            }
        }
        if changed {
            predecessor_rewrites.push((activity.key.clone(), links));
        }
        if activity.parent_key.as_deref() == Some(bare) {
            parent_rewrites.push(activity.key.clone());
        }
    }

    info!(
        provisional = %provisional,
        durable = %durable,
        references = predecessor_rewrites.len(),
        children = parent_rewrites.len(),
        "planned promotion"
    );
    Ok(RewritePlan {
        provisional: provisional.clone(),
        durable,
        predecessor_rewrites,
        parent_rewrites,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteError {
    EmptyDurableId,
    NotProvisional(NodeId),
    UnknownActivity(NodeId),
    DurableIdInUse(NodeId),
    StalePlan(ActivityKey),
}

impl fmt::Display for PromoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromoteError::EmptyDurableId => write!(f, "durable id cannot be empty"),
            PromoteError::NotProvisional(node) => {
                write!(f, "'{}' already has a durable id", node)
            }
            PromoteError::UnknownActivity(node) => write!(f, "unknown activity '{}'", node),
            PromoteError::DurableIdInUse(node) => {
                write!(f, "durable id '{}' is already used in this schedule", node)
            }
            PromoteError::StalePlan(key) => {
                write!(f, "activity '{}' changed since the promotion was planned", key)
            }
        }
    }
}

impl Error for PromoteError {}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{create_provisional, promote, PromoteError, ProvisionalSeed};
    use crate::codec;
    use crate::domain::activity::Activity;
    use crate::domain::link::{LinkType, PredecessorLink};
    use crate::domain::node_id::{ActivityKey, ScheduleId};

    fn schedule() -> ScheduleId {
        ScheduleId::parse("S1").expect("schedule id should parse")
    }

    fn durable(key: &str, links: &[PredecessorLink]) -> Activity {
        let mut act = Activity::new(ActivityKey::Durable(key.to_string()), schedule(), key);
        act.predecessors_raw = Some(codec::encode(links));
        act
    }

    fn draft(name: &str) -> Activity {
        create_provisional(
            schedule(),
            ProvisionalSeed {
                display_name: name.to_string(),
                start_date: Some("2024-04-01".to_string()),
                duration: Some(3),
                ..ProvisionalSeed::default()
            },
            |_| false,
        )
    }

    #[test]
    fn provisional_activities_get_prefixed_keys_and_derived_end() {
        let created = draft("Temporary works");
        assert!(created.key.is_provisional());
        assert!(created.key.as_str().starts_with("new-"));
        assert_eq!(created.key.as_str().len(), 12);
        assert_eq!(created.end_date.as_deref(), Some("2024-04-03"));
    }

    #[test]
    fn key_generation_skips_taken_candidates() {
        let mut taken = HashSet::new();
        let first = create_provisional(schedule(), ProvisionalSeed::default(), |_| false);
        taken.insert(first.key.as_str().to_string());
        let mut calls = 0;
        let second = create_provisional(schedule(), ProvisionalSeed::default(), |candidate| {
            calls += 1;
            calls == 1 || taken.contains(candidate)
        });
        assert!(calls >= 2);
        assert_ne!(second.key, first.key);
    }

    #[test]
    fn promotion_rewrites_every_reference_to_the_provisional_key() {
        let p = draft("Temporary works");
        let bare = p.key.as_str().to_string();
        let x = durable(
            "x",
            &[
                PredecessorLink::new(bare.clone(), LinkType::StartToStart, 2),
                PredecessorLink::finish_to_start("other"),
            ],
        );
        let y = durable("y", &[PredecessorLink::finish_to_start(p.node_id().to_string())]);
        let mut child = durable("z", &[]);
        child.parent_key = Some(bare.clone());
        let mut activities = vec![p.clone(), x, y, child];

        let plan = promote(&activities, &p.node_id(), "REC-42").expect("promotion should plan");
        assert_eq!(plan.touched(), 3);
        plan.apply(&mut activities).expect("plan should apply");

        assert_eq!(activities[0].key, ActivityKey::Durable("REC-42".to_string()));
        assert_eq!(
            activities[1].predecessors(),
            vec![
                PredecessorLink::new("REC-42", LinkType::StartToStart, 2),
                PredecessorLink::finish_to_start("other"),
            ]
        );
        assert_eq!(
            activities[2].predecessors(),
            vec![PredecessorLink::finish_to_start("REC-42")]
        );
        assert_eq!(activities[3].parent_key.as_deref(), Some("REC-42"));
        assert!(activities
            .iter()
            .all(|activity| !activity.predecessors_raw.as_deref().unwrap_or("").contains(&bare)));
    }

    #[test]
    fn promotion_rejects_bad_requests() {
        let p = draft("Temporary works");
        let taken = durable("REC-1", &[]);
        let activities = vec![p.clone(), taken.clone()];

        assert_eq!(
            promote(&activities, &p.node_id(), "  "),
            Err(PromoteError::EmptyDurableId)
        );
        assert!(matches!(
            promote(&activities, &taken.node_id(), "REC-2"),
            Err(PromoteError::NotProvisional(_))
        ));
        assert!(matches!(
            promote(&activities, &p.node_id(), "REC-1"),
            Err(PromoteError::DurableIdInUse(_))
        ));
        let unknown = draft("Never stored");
        assert!(matches!(
            promote(&activities, &unknown.node_id(), "REC-9"),
            Err(PromoteError::UnknownActivity(_))
        ));
    }

    #[test]
    fn stale_plan_leaves_activities_untouched() {
        let p = draft("Temporary works");
        let x = durable("x", &[PredecessorLink::finish_to_start(p.key.as_str())]);
        let activities = vec![p.clone(), x];
        let plan = promote(&activities, &p.node_id(), "REC-42").expect("promotion should plan");

        let mut without_x = vec![p.clone()];
        assert!(matches!(
            plan.apply(&mut without_x),
            Err(PromoteError::StalePlan(_))
        ));
        assert_eq!(without_x, vec![p]);
    }
}
