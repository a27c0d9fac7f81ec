use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand};

pub use crate::cli_ops::*;

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "plangraph")]
#[command(bin_name = "plangraph")]
#[command(version)]
#[command(about = "Activity dependency graphs across master and overlay schedules")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        global = true,
        env = "PLANGRAPH_DB_PATH",
        default_value = ".plangraph/cache/store.sqlite",
        help = "Path to the local SQLite document store."
    )]
    pub db: String,

    #[arg(
        short = 'C',
        long,
        global = true,
        env = "PLANGRAPH_REPO_ROOT",
        default_value = ".",
        help = "Project root that contains .plangraph/."
    )]
    pub repo_root: PathBuf,

    #[arg(
        long,
        global = true,
        env = "PLANGRAPH_CONFIG",
        help = "Config file (defaults to .plangraph/config.toml under the project root)."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PLANGRAPH_LOG",
        help = "Log level or filter directive, for example debug or plangraph::graph=trace."
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Manage master and overlay schedules.")]
    Schedule(ScheduleArgs),
    #[command(about = "Create an activity.")]
    New(NewArgs),
    #[command(about = "Import activity records from a JSONL file.")]
    Import(ImportArgs),
    #[command(about = "Print the dependency graph.")]
    Graph(GraphArgs),
    #[command(about = "Show one activity with its resolved links.")]
    Show(ShowArgs),
    #[command(about = "Move an activity to a new start date.")]
    Move(MoveArgs),
    #[command(about = "Add or remove a single link.")]
    Link(LinkArgs),
    #[command(about = "Replace an activity's predecessor list.")]
    Preds(LinkListArgs),
    #[command(about = "Replace an activity's successor list.")]
    Succs(LinkListArgs),
    #[command(about = "Delete an activity and strip links to it.")]
    Rm(RemoveArgs),
    #[command(about = "Save every draft activity to the store.")]
    Promote(JsonArgs),
    #[command(about = "Apply a propagation result file to a schedule.")]
    Merge(MergeArgs),
    #[command(about = "Report data the graph builder tolerates silently.")]
    Check(JsonArgs),
    #[command(about = "Generate or install shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct NewArgs {
    #[arg(help = "Schedule id.")]
    pub schedule: String,

    #[arg(help = "Display name.")]
    pub name: String,

    #[arg(short = 's', long, help = "Start date (YYYY-MM-DD).")]
    pub start: Option<String>,

    #[arg(short = 'e', long, help = "End date (YYYY-MM-DD).")]
    pub end: Option<String>,

    #[arg(long, help = "Duration in days; derives the end date when --end is omitted.")]
    pub duration: Option<i64>,

    #[arg(long = "linked-doc", help = "Cross-schedule linked document id.")]
    pub linked_doc: Option<String>,

    #[arg(long, help = "Parent activity key within the same schedule.")]
    pub parent: Option<String>,

    #[arg(
        short = 'p',
        long = "pred",
        value_name = "SPEC",
        help = "Predecessor as <ref>[@TYPE[+/-LAG]]. Repeatable."
    )]
    pub preds: Vec<String>,

    #[arg(long, help = "Keep the activity as a local draft until `promote`.")]
    pub draft: bool,

    #[arg(long, help = "Print the created activity as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(help = "JSONL file with one record per line.")]
    pub file: String,

    #[arg(long, help = "Schedule the records belong to.")]
    pub schedule: String,

    #[arg(long, help = "Parse and count without writing.")]
    pub dry_run: bool,

    #[arg(long, help = "Print the run summary as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct GraphArgs {
    #[arg(
        long = "schedule",
        value_name = "ID",
        help = "Only these schedules, in overlay color order. Repeatable."
    )]
    pub schedules: Vec<String>,

    #[arg(long, help = "Resolve linked document ids across schedules.")]
    pub cross_schedule: bool,

    #[arg(long, help = "Print the widget payload as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(help = "Node id, for example rec:S1:s1-3fa2.")]
    pub id: String,

    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[arg(help = "Node id.")]
    pub id: String,

    #[arg(short = 's', long, help = "New start date (YYYY-MM-DD).")]
    pub start: String,

    #[arg(long, help = "New duration in days.")]
    pub duration: Option<i64>,
}

#[derive(Debug, Args)]
pub struct LinkListArgs {
    #[arg(help = "Node id of the activity being edited.")]
    pub id: String,

    #[arg(
        value_name = "SPEC",
        help = "Links as <ref>[@TYPE[+/-LAG]]; none clears the list."
    )]
    pub links: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[arg(help = "Node id.")]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[arg(help = "JSON array of updated activities.")]
    pub file: PathBuf,

    #[arg(long, help = "Target schedule (defaults to the only master).")]
    pub schedule: Option<String>,

    #[arg(long, help = "Print the merge summary as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
#[command(about = "Generate or install shell completions.")]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish). Auto-detected if omitted.")]
    pub shell: Option<String>,

    #[arg(long, help = "Install the completions for the current user.")]
    pub install: bool,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
