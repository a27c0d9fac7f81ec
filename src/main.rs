mod app;
mod check;
mod cli;
mod cli_ops;
mod codec;
mod completions;
mod config;
mod db;
mod domain;
mod drafts;
mod graph;
mod imports;
mod logging;
mod provisional;
mod record_id;
mod resolver;
mod session;
mod store;
mod synchronizer;
mod ui;

use std::path::Path;

const STATE_DIR: &str = ".plangraph";
const CONFIG_FILE: &str = "config.toml";

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn load_config(cli: &cli::Cli) -> Result<config::Config, app::AppError> {
    let loaded = match &cli.config {
        Some(path) => config::Config::load(path, true)?,
        None => config::Config::load(&cli.repo_root.join(STATE_DIR).join(CONFIG_FILE), false)?,
    };
    Ok(loaded)
}

fn run() -> Result<(), app::AppError> {
    use clap::Parser;
    use cli::{Commands, LinkSubcommands, ScheduleSubcommands};

    let cli = cli::Cli::parse();
    if let Commands::Completions(args) = &cli.command {
        return completions::run_completions_command(args.shell.as_deref(), args.install);
    }

    let config = load_config(&cli)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    logging::init_logging(&level, config.logging.format)?;

    let state_dir = cli.repo_root.join(STATE_DIR);
    let mut app = app::App::open(&cli.db, &state_dir, config)?;

    match cli.command {
        Commands::Schedule(args) => match args.command {
            ScheduleSubcommands::Add(add) => {
                let schedule = app.add_schedule(&add.id, add.role())?;
                println!("added {} schedule {}", schedule.role, schedule.id);
            }
            ScheduleSubcommands::List(list) => {
                let schedules = app.list_schedules()?;
                if list.json {
                    print_json(&schedules);
                } else if schedules.is_empty() {
                    println!("no schedules");
                } else {
                    for schedule in &schedules {
                        let drafts = if schedule.drafts > 0 {
                            format!(", {} draft(s)", schedule.drafts)
                        } else {
                            String::new()
                        };
                        println!(
                            "{} [{}] {} activities{}",
                            schedule.id, schedule.role, schedule.activities, drafts
                        );
                    }
                }
            }
            ScheduleSubcommands::Clone(clone) => {
                let summary = app.clone_schedule(&clone.from, &clone.to)?;
                println!(
                    "cloned {} -> {} ({} activities)",
                    summary.from, summary.to, summary.copied
                );
            }
        },
        Commands::New(args) => {
            let activity = app.create_activity(
                &args.schedule,
                app::NewActivity {
                    display_name: args.name,
                    start_date: args.start,
                    end_date: args.end,
                    duration: args.duration,
                    linked_document_id: args.linked_doc,
                    parent_key: args.parent,
                    predecessors: args.preds,
                },
                args.draft,
            )?;
            if args.json {
                print_json(&activity);
            } else if args.draft {
                println!(
                    "drafted {} {} in {}",
                    activity.node_id(),
                    activity.display_name,
                    app.drafts_path().display()
                );
            } else {
                println!("created {} {}", activity.node_id(), activity.display_name);
            }
        }
        Commands::Import(args) => {
            let summary = app.import_jsonl(&args.file, &args.schedule, args.dry_run)?;
            if args.json {
                print_json(&summary);
            } else {
                println!(
                    "import {} status={} processed={} imported={} updated={} skipped={} errors={}{}",
                    summary.source_ref,
                    summary.status,
                    summary.processed_count,
                    summary.imported_count,
                    summary.updated_count,
                    summary.skipped_count,
                    summary.error_count,
                    if summary.dry_run { " (dry run)" } else { "" }
                );
                if let Some(last_error) = &summary.last_error {
                    println!("last error: {}", last_error);
                }
            }
        }
        Commands::Graph(args) => {
            let graph = app.graph(&args.schedules, args.cross_schedule)?;
            if args.json {
                print_json(&graph.to_widget());
            } else {
                ui::print_graph(&graph, &args.schedules);
            }
        }
        Commands::Show(args) => {
            let detail = app.show(&args.id)?;
            if args.json {
                print_json(&detail);
            } else {
                ui::print_detail(&detail);
            }
        }
        Commands::Move(args) => {
            let view = app.move_activity(&args.id, &args.start, args.duration)?;
            println!("{}", cli::commit_summary("moved", &view));
        }
        Commands::Link(args) => match args.command {
            LinkSubcommands::Add(add) => {
                let view = app.add_link(&add.source, &add.target, add.link_type.as_deref(), add.lag)?;
                println!("{}", cli::commit_summary("linked", &view));
            }
            LinkSubcommands::Rm(rm) => {
                let view = app.remove_link(&rm.edge_id)?;
                println!("{}", cli::commit_summary("unlinked", &view));
            }
        },
        Commands::Preds(args) => {
            let view = app.set_predecessors(&args.id, &args.links)?;
            println!("{}", cli::commit_summary("updated", &view));
        }
        Commands::Succs(args) => {
            let view = app.set_successors(&args.id, &args.links)?;
            println!("{}", cli::commit_summary("updated", &view));
        }
        Commands::Rm(args) => {
            let view = app.remove_activity(&args.id)?;
            println!("{}", cli::commit_summary("removed", &view));
        }
        Commands::Promote(args) => {
            let reports = app.promote_drafts()?;
            if args.json {
                print_json(&reports);
            } else if reports.is_empty() {
                println!("no drafts to promote");
            } else {
                for report in &reports {
                    println!(
                        "promoted {} -> {} ({} reference(s) rewritten)",
                        report.provisional, report.durable, report.rewritten
                    );
                }
            }
        }
        Commands::Merge(args) => {
            let merged = app.merge(&args.file, args.schedule.as_deref())?;
            if args.json {
                print_json(&merged);
            } else {
                print_merge(&merged, &args.file);
            }
        }
        Commands::Check(args) => {
            let report = app.check()?;
            if args.json {
                print_json(&report);
            } else {
                ui::print_check(&report);
            }
            if !report.ok() {
                return Err(app::AppError::InvalidArgument(format!(
                    "check found {} issue(s)",
                    report.issues.len()
                )));
            }
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn print_merge(merged: &app::MergeView, file: &Path) {
    println!(
        "merged {} into {}: matched={} unchanged={} written={}",
        file.display(),
        merged.schedule,
        merged.summary.matched,
        merged.summary.unchanged,
        merged.commit.report.written.len()
    );
    if !merged.summary.unknown.is_empty() {
        println!("unknown record ids: {}", merged.summary.unknown.join(", "));
    }
    for failure in &merged.commit.report.failures {
        println!("failed {}: {}", failure.node, failure.message);
    }
}
