use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::info;

use crate::check::{run_check, CheckReport};
use crate::codec;
use crate::config::{Config, ConfigError};
use crate::domain::activity::{Activity, ActivityPatch, Schedule, ScheduleRole};
use crate::domain::dates::{duration_in_range, normalize_date, parse_date};
use crate::domain::link::{LinkSpec, LinkType, ParseLinkSpecError, PredecessorLink};
use crate::domain::node_id::{ActivityKey, NodeId, ParseNodeIdError, ScheduleId};
use crate::drafts::{DraftError, DraftStore};
use crate::graph::ScheduleGraph;
use crate::imports::{ImportError, ImportService, ImportSummary};
use crate::provisional::ProvisionalSeed;
use crate::session::{
    CommitReport, DetailView, EventOutcome, GraphSession, MergeSummary, PlannedEdit,
    PromotionReport, PropagatedActivity, SessionError, WidgetEvent,
};
use crate::store::{DocumentStore, SqliteStore, StoreError};
use crate::synchronizer::SuccessorEdit;

pub struct App {
    store: SqliteStore,
    drafts: DraftStore,
    config: Config,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduleView {
    pub id: ScheduleId,
    pub role: ScheduleRole,
    pub activities: usize,
    pub drafts: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CloneSummary {
    pub from: ScheduleId,
    pub to: ScheduleId,
    pub copied: usize,
}

/// Fields for `new`. Dates are validated before anything is written.
#[derive(Debug, Clone, Default)]
pub struct NewActivity {
    pub display_name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration: Option<i64>,
    pub linked_document_id: Option<String>,
    pub parent_key: Option<String>,
    pub predecessors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommitView {
    #[serde(flatten)]
    pub report: CommitReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<CommitReport> for CommitView {
    fn from(report: CommitReport) -> Self {
        let message = report.partial_failure_message();
        Self { report, message }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MergeView {
    pub schedule: ScheduleId,
    #[serde(flatten)]
    pub summary: MergeSummary,
    pub commit: CommitView,
}

impl App {
    pub fn open(db_path: &str, state_dir: &Path, config: Config) -> Result<Self, AppError> {
        let store = SqliteStore::open(db_path)?;
        Ok(Self {
            store,
            drafts: DraftStore::new(state_dir),
            config,
        })
    }

    pub fn drafts_path(&self) -> PathBuf {
        self.drafts.path().to_path_buf()
    }

    pub fn add_schedule(&self, id: &str, role: ScheduleRole) -> Result<Schedule, AppError> {
        let id = parse_schedule(id)?;
        let schedule = Schedule { id, role };
        if !self.store.add_schedule(&schedule)? {
            return Err(AppError::InvalidArgument(format!(
                "schedule '{}' already exists",
                schedule.id
            )));
        }
        info!(schedule = %schedule.id, role = schedule.role.as_str(), "added schedule");
        Ok(schedule)
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduleView>, AppError> {
        let activities = self.store.list_activities(None)?;
        let drafts = self.drafts.load()?;
        Ok(self
            .store
            .schedules()?
            .into_iter()
            .map(|schedule| ScheduleView {
                activities: activities
                    .iter()
                    .filter(|activity| activity.schedule_id == schedule.id)
                    .count(),
                drafts: drafts
                    .iter()
                    .filter(|activity| activity.schedule_id == schedule.id)
                    .count(),
                id: schedule.id,
                role: schedule.role,
            })
            .collect())
    }

    /// Seeds a new overlay schedule from `from`. Copies get fresh record ids,
    /// and references to source record ids (predecessors and `parentKey`) are
    /// rewritten to the matching copy. A copy without a `linkedDocumentId`
    /// takes its source's record id there.
    pub fn clone_schedule(&mut self, from: &str, to: &str) -> Result<CloneSummary, AppError> {
        let from = self.require_schedule(from)?.id;
        let to = parse_schedule(to)?;
        if !self.store.add_schedule(&Schedule::overlay(to.clone()))? {
            return Err(AppError::InvalidArgument(format!(
                "schedule '{}' already exists",
                to
            )));
        }

        let sources = self.store.list_activities(Some(&from))?;
        let mut copies = HashMap::with_capacity(sources.len());
        for source in &sources {
            let mut copy = source.clone();
            copy.schedule_id = to.clone();
            copy.key = ActivityKey::Provisional(source.key.as_str().to_string());
            if copy.linked_document_id.is_none() {
                copy.linked_document_id = Some(source.key.as_str().to_string());
            }
            let record_id = self.store.create_activity(&copy)?;
            copies.insert(source.key.as_str().to_string(), record_id);
        }

        for source in &sources {
            let Some(record_id) = copies.get(source.key.as_str()) else {
                continue;
            };
            let links = source.predecessors();
            let renamed = links
                .iter()
                .map(|link| match copies.get(link.predecessor.trim()) {
                    Some(copy) => PredecessorLink {
                        predecessor: copy.clone(),
                        ..link.clone()
                    },
                    None => link.clone(),
                })
                .collect::<Vec<_>>();
            let mut patch = ActivityPatch::default();
            if renamed != links {
                patch.predecessors_raw = Some(codec::encode(&renamed));
            }
            patch.parent_key = source
                .parent_key
                .as_deref()
                .and_then(|parent| copies.get(parent.trim()))
                .cloned();
            if patch.has_changes() {
                self.store.update_activity(&to, record_id, &patch)?;
            }
        }
        info!(from = %from, to = %to, copied = sources.len(), "cloned schedule");
        Ok(CloneSummary {
            from,
            to,
            copied: sources.len(),
        })
    }

    pub fn create_activity(
        &mut self,
        schedule: &str,
        fields: NewActivity,
        draft: bool,
    ) -> Result<Activity, AppError> {
        let schedule = self.require_schedule(schedule)?.id;
        let display_name = fields.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(AppError::InvalidArgument(
                "activity name cannot be empty".to_string(),
            ));
        }
        if let Some(days) = fields.duration.filter(|days| !duration_in_range(*days)) {
            return Err(SessionError::InvalidDuration(days).into());
        }
        let predecessors = self.parse_link_specs(&fields.predecessors)?;
        let seed = ProvisionalSeed {
            display_name,
            linked_document_id: fields.linked_document_id,
            parent_key: fields.parent_key,
            start_date: checked_date(fields.start_date.as_deref())?,
            end_date: checked_date(fields.end_date.as_deref())?,
            duration: fields.duration,
            predecessors,
        };

        let mut session = self.session(&[], false)?;
        let mut node = session.add_provisional(&schedule, seed)?;
        if !draft {
            node = session.promote(&mut self.store, &node)?.durable;
        }
        self.save_drafts(&session)?;
        Ok(session.activity(&node)?.clone())
    }

    pub fn graph(&self, schedules: &[String], cross_schedule: bool) -> Result<ScheduleGraph, AppError> {
        let session = self.session(schedules, cross_schedule)?;
        Ok(session.graph().clone())
    }

    pub fn show(&self, node: &str) -> Result<DetailView, AppError> {
        let node = parse_node(node)?;
        let session = self.session(&[], false)?;
        match session.plan_event(&WidgetEvent::NodeClicked { node })? {
            EventOutcome::Detail(detail) => Ok(*detail),
            EventOutcome::Edit(_) => Err(AppError::InvalidArgument(
                "node click produced an edit".to_string(),
            )),
        }
    }

    pub fn move_activity(
        &mut self,
        node: &str,
        start_date: &str,
        duration: Option<i64>,
    ) -> Result<CommitView, AppError> {
        let node = parse_node(node)?;
        self.dispatch(
            WidgetEvent::DateChanged {
                node,
                start_date: start_date.to_string(),
                duration,
            },
            false,
        )
    }

    pub fn add_link(
        &mut self,
        source: &str,
        target: &str,
        link_type: Option<&str>,
        lag: i64,
    ) -> Result<CommitView, AppError> {
        let source = parse_node(source)?;
        let target = parse_node(target)?;
        let link_type = self.link_type(link_type)?;
        let mut session = self.session(&[], false)?;
        let edit = session.plan_link_added(&source, &target, link_type, lag)?;
        self.commit(&mut session, edit)
    }

    pub fn remove_link(&mut self, edge_id: &str) -> Result<CommitView, AppError> {
        self.dispatch(
            WidgetEvent::LinkRemoved {
                edge_id: edge_id.trim().to_string(),
            },
            true,
        )
    }

    pub fn set_predecessors(&mut self, node: &str, specs: &[String]) -> Result<CommitView, AppError> {
        let node = parse_node(node)?;
        let links = self.parse_link_specs(specs)?;
        let mut session = self.session(&[], false)?;
        let edit = session.plan_predecessor_edit(&node, links)?;
        self.commit(&mut session, edit)
    }

    pub fn set_successors(&mut self, node: &str, specs: &[String]) -> Result<CommitView, AppError> {
        let node = parse_node(node)?;
        let edits = self
            .parse_link_specs(specs)?
            .into_iter()
            .map(|link| SuccessorEdit::new(link.predecessor, link.link_type, link.lag))
            .collect();
        let mut session = self.session(&[], false)?;
        let edit = session.plan_successor_edit(&node, edits)?;
        self.commit(&mut session, edit)
    }

    pub fn remove_activity(&mut self, node: &str) -> Result<CommitView, AppError> {
        let node = parse_node(node)?;
        self.dispatch(WidgetEvent::NodeDeleted { node }, false)
    }

    /// Creates every draft in the store. Drafts that were promoted before a
    /// failure stay promoted.
    pub fn promote_drafts(&mut self) -> Result<Vec<PromotionReport>, AppError> {
        let mut session = self.session(&[], false)?;
        let pending = session
            .provisional_activities()
            .map(Activity::node_id)
            .collect::<Vec<_>>();
        let mut reports = Vec::with_capacity(pending.len());
        for node in pending {
            let outcome = session.promote(&mut self.store, &node);
            self.save_drafts(&session)?;
            reports.push(outcome?);
        }
        Ok(reports)
    }

    pub fn merge(&mut self, file: &Path, schedule: Option<&str>) -> Result<MergeView, AppError> {
        let schedule = match schedule {
            Some(raw) => self.require_schedule(raw)?.id,
            None => self.sole_master()?,
        };
        let raw = std::fs::read_to_string(file)?;
        let updates: Vec<PropagatedActivity> = serde_json::from_str(&raw).map_err(|err| {
            AppError::InvalidArgument(format!("invalid propagation result: {}", err))
        })?;

        let mut session = self.session(&[], false)?;
        let (edit, summary) = session.plan_merge(&schedule, &updates)?;
        let commit = self.commit(&mut session, edit)?;
        Ok(MergeView {
            schedule,
            summary,
            commit,
        })
    }

    pub fn check(&self) -> Result<CheckReport, AppError> {
        let schedules = self.store.schedules()?;
        let activities = self.all_activities()?;
        Ok(run_check(&schedules, &activities))
    }

    pub fn import_jsonl(
        &mut self,
        file: &str,
        schedule: &str,
        dry_run: bool,
    ) -> Result<ImportSummary, AppError> {
        let schedule = parse_schedule(schedule)?;
        Ok(ImportService::new(&mut self.store).import_jsonl(file, &schedule, dry_run)?)
    }

    /// Plans and commits a widget event that edits the graph.
    fn dispatch(&mut self, event: WidgetEvent, cross_schedule: bool) -> Result<CommitView, AppError> {
        let mut session = self.session(&[], cross_schedule)?;
        match session.plan_event(&event)? {
            EventOutcome::Edit(edit) => self.commit(&mut session, edit),
            EventOutcome::Detail(detail) => Err(AppError::InvalidArgument(format!(
                "{} is a read-only event",
                detail.node
            ))),
        }
    }

    fn commit(&mut self, session: &mut GraphSession, edit: PlannedEdit) -> Result<CommitView, AppError> {
        let report = session.commit(&mut self.store, edit)?;
        self.save_drafts(session)?;
        Ok(CommitView::from(report))
    }

    fn save_drafts(&self, session: &GraphSession) -> Result<(), AppError> {
        let drafts = session
            .provisional_activities()
            .cloned()
            .collect::<Vec<_>>();
        Ok(self.drafts.save(&drafts)?)
    }

    fn all_activities(&self) -> Result<Vec<Activity>, AppError> {
        let mut activities = self.store.list_activities(None)?;
        activities.extend(self.drafts.load()?);
        Ok(activities)
    }

    /// Loads stored activities plus drafts. An empty `only` means every schedule.
    fn session(&self, only: &[String], cross_schedule: bool) -> Result<GraphSession, AppError> {
        let mut schedules = self.store.schedules()?;
        if !only.is_empty() {
            let wanted = only
                .iter()
                .map(|raw| self.require_schedule(raw).map(|schedule| schedule.id))
                .collect::<Result<Vec<_>, _>>()?;
            schedules.retain(|schedule| wanted.contains(&schedule.id));
        }
        let mut options = self.config.graph.clone();
        options.cross_schedule_links |= cross_schedule;
        Ok(GraphSession::new(schedules, self.all_activities()?, options))
    }

    fn require_schedule(&self, raw: &str) -> Result<Schedule, AppError> {
        let id = parse_schedule(raw)?;
        self.store
            .schedule(&id)?
            .ok_or_else(|| AppError::NotFound(format!("schedule '{}'", id)))
    }

    fn sole_master(&self) -> Result<ScheduleId, AppError> {
        let masters = self
            .store
            .schedules()?
            .into_iter()
            .filter(|schedule| schedule.role == ScheduleRole::Master)
            .collect::<Vec<_>>();
        match masters.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(AppError::InvalidArgument(
                "no master schedule; pass --schedule".to_string(),
            )),
            _ => Err(AppError::InvalidArgument(
                "several master schedules; pass --schedule".to_string(),
            )),
        }
    }

    fn link_type(&self, raw: Option<&str>) -> Result<LinkType, AppError> {
        match raw {
            Some(raw) => LinkType::from_str(raw)
                .map_err(|err| AppError::InvalidArgument(err.to_string())),
            None => Ok(self.config.default_link_type),
        }
    }

    fn parse_link_specs(&self, specs: &[String]) -> Result<Vec<PredecessorLink>, AppError> {
        specs
            .iter()
            .map(|raw| {
                LinkSpec::from_str(raw)
                    .map(|spec| spec.into_link(self.config.default_link_type))
                    .map_err(AppError::from)
            })
            .collect()
    }
}

fn parse_schedule(raw: &str) -> Result<ScheduleId, AppError> {
    Ok(ScheduleId::parse(raw)?)
}

fn parse_node(raw: &str) -> Result<NodeId, AppError> {
    Ok(NodeId::from_str(raw.trim())?)
}

fn checked_date(raw: Option<&str>) -> Result<Option<String>, AppError> {
    match raw {
        None => Ok(None),
        Some(value) if parse_date(value).is_some() => Ok(normalize_date(Some(value))),
        Some(value) => Err(SessionError::InvalidDate(value.to_string()).into()),
    }
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Store(StoreError),
    Session(SessionError),
    Import(ImportError),
    Draft(DraftError),
    Config(ConfigError),
    NodeId(ParseNodeIdError),
    LinkSpec(ParseLinkSpecError),
    InvalidArgument(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Store(err) => write!(f, "{}", err),
            AppError::Session(err) => write!(f, "{}", err),
            AppError::Import(err) => write!(f, "import error: {}", err),
            AppError::Draft(err) => write!(f, "drafts error: {}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::NodeId(err) => write!(f, "{}", err),
            AppError::LinkSpec(err) => write!(f, "{}", err),
            AppError::InvalidArgument(message) => write!(f, "{}", message),
            AppError::NotFound(what) => write!(f, "{} not found", what),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Session(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::Draft(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::NodeId(err) => Some(err),
            AppError::LinkSpec(err) => Some(err),
            AppError::InvalidArgument(_) => None,
            AppError::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::Store(value)
    }
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        AppError::Session(value)
    }
}

impl From<ImportError> for AppError {
    fn from(value: ImportError) -> Self {
        AppError::Import(value)
    }
}

impl From<DraftError> for AppError {
    fn from(value: DraftError) -> Self {
        AppError::Draft(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<ParseNodeIdError> for AppError {
    fn from(value: ParseNodeIdError) -> Self {
        AppError::NodeId(value)
    }
}

impl From<ParseLinkSpecError> for AppError {
    fn from(value: ParseLinkSpecError) -> Self {
        AppError::LinkSpec(value)
    }
}

#[cfg(test)]
mod tests;
