use clap::{Args, Subcommand};

use crate::app::CommitView;
use crate::domain::activity::ScheduleRole;
use crate::ui::format_node_list;

#[derive(Debug, Args)]
#[command(
    about = "Schedule commands.",
    long_about = "Add, list, or clone master and overlay schedules."
)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleSubcommands {
    #[command(about = "Add a schedule (an overlay unless --master).")]
    Add(ScheduleAddArgs),
    #[command(about = "List schedules with activity counts.")]
    List(ScheduleListArgs),
    #[command(about = "Copy a schedule's activities into a new overlay.")]
    Clone(ScheduleCloneArgs),
}

#[derive(Debug, Args)]
pub struct ScheduleAddArgs {
    #[arg(help = "Schedule id; must not contain ':'.")]
    pub id: String,

    #[arg(long, help = "Add as the master baseline.")]
    pub master: bool,
}

impl ScheduleAddArgs {
    pub fn role(&self) -> ScheduleRole {
        if self.master {
            ScheduleRole::Master
        } else {
            ScheduleRole::Overlay
        }
    }
}

#[derive(Debug, Args)]
pub struct ScheduleListArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ScheduleCloneArgs {
    #[arg(help = "Source schedule id.")]
    pub from: String,
    #[arg(help = "New overlay schedule id.")]
    pub to: String,
}

#[derive(Debug, Args)]
#[command(
    about = "Link commands.",
    long_about = "Add a link between two activities of one schedule, or remove one by edge id."
)]
pub struct LinkArgs {
    #[command(subcommand)]
    pub command: LinkSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum LinkSubcommands {
    #[command(about = "Add a link: source -> target.")]
    Add(LinkAddArgs),
    #[command(about = "Remove a link by edge id (<source>-><target>).")]
    Rm(LinkRemoveArgs),
}

#[derive(Debug, Args)]
pub struct LinkAddArgs {
    #[arg(help = "Predecessor node id.")]
    pub source: String,
    #[arg(help = "Successor node id.")]
    pub target: String,
    #[arg(
        short = 't',
        long = "type",
        help = "Link type: FS, SS, FF or SF (defaults to links.default_type)."
    )]
    pub link_type: Option<String>,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true, help = "Lag in days.")]
    pub lag: i64,
}

#[derive(Debug, Args)]
pub struct LinkRemoveArgs {
    #[arg(help = "Edge id as printed by `graph --json`.")]
    pub edge_id: String,
}

/// One-line result of a commit, plus the partial-failure message if any.
pub fn commit_summary(verb: &str, view: &CommitView) -> String {
    let report = &view.report;
    let mut line = match &report.primary {
        Some(primary) => format!("{} {}", verb, primary),
        None => format!("{} nothing", verb),
    };
    let mut extra = Vec::new();
    let others = report
        .written
        .iter()
        .filter(|node| Some(*node) != report.primary.as_ref())
        .cloned()
        .collect::<Vec<_>>();
    if !others.is_empty() {
        extra.push(format!("also updated {}", format_node_list(&others)));
    }
    if !report.local.is_empty() {
        extra.push(format!("drafts {}", format_node_list(&report.local)));
    }
    if !report.deleted.is_empty() {
        extra.push(format!("deleted {}", format_node_list(&report.deleted)));
    }
    if !extra.is_empty() {
        line.push_str(&format!(" ({})", extra.join("; ")));
    }
    if let Some(message) = &view.message {
        line.push('\n');
        line.push_str(message);
    }
    line
}
