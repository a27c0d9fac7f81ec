use std::collections::HashSet;
use std::io::{self, IsTerminal};

use crate::check::CheckReport;
use crate::domain::activity::ScheduleRole;
use crate::domain::node_id::NodeId;
use crate::graph::{GraphNode, ScheduleGraph};
use crate::session::{DetailLink, DetailView};

pub fn print_graph(graph: &ScheduleGraph, schedules: &[String]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Schedule graph"));
    if !schedules.is_empty() {
        println!("{}", palette.dim(&format!("schedules: {}", schedules.join(","))));
    }

    if graph.nodes.is_empty() {
        println!("{}", palette.dim("no activities with a start date"));
    }
    for (depth, node) in tree_rows(graph) {
        let predecessors = graph.incoming(&node.id).count();
        println!("{}", format_node_row(node, depth, predecessors, &palette));
    }

    for skipped in &graph.skipped {
        println!(
            "{}",
            palette.warn(&format!(
                "skipped {} ({}): no usable start date",
                skipped.node, skipped.display_name
            ))
        );
    }
    for dropped in &graph.dropped {
        println!(
            "{}",
            palette.warn(&format!(
                "dropped '{}' on {}: {}",
                dropped.reference,
                dropped.target,
                dropped.reason.as_str()
            ))
        );
    }
    println!(
        "{}",
        palette.dim(&format!(
            "{} activities, {} links",
            graph.nodes.len(),
            graph.edges.len()
        ))
    );
}

/// Nodes in hierarchy order: each parent followed by its children.
fn tree_rows(graph: &ScheduleGraph) -> Vec<(usize, &GraphNode)> {
    let mut rows = Vec::with_capacity(graph.nodes.len());
    let mut visited = HashSet::new();
    let mut stack = graph
        .children(None)
        .map(|node| (0usize, node))
        .collect::<Vec<_>>();
    stack.reverse();

    while let Some((depth, node)) = stack.pop() {
        if !visited.insert(&node.id) {
            continue;
        }
        rows.push((depth, node));
        let mut children = graph
            .children(Some(&node.id))
            .map(|child| (depth + 1, child))
            .collect::<Vec<_>>();
        children.reverse();
        stack.extend(children);
    }
    rows
}

fn format_node_row(node: &GraphNode, depth: usize, predecessors: usize, palette: &Palette) -> String {
    let indent = indentation_prefix(depth, palette);
    let mut line = format!(
        "{}{} {} {} {}",
        indent,
        palette.id(&node.id.to_string()),
        palette.role(node.role),
        node.label,
        palette.dim(&format!(
            "{} .. {} ({}d)",
            node.start_date, node.end_date, node.duration
        ))
    );
    if predecessors > 0 {
        line.push(' ');
        line.push_str(&palette.links(&format!("<- {}", predecessors)));
    }
    line
}

fn indentation_prefix(depth: usize, palette: &Palette) -> String {
    if depth == 0 {
        return String::new();
    }
    let spaces = "  ".repeat(depth.saturating_sub(1));
    palette.dim(&format!("{spaces}↳ "))
}

pub fn print_detail(detail: &DetailView) {
    let palette = Palette::auto();
    let activity = &detail.activity;
    println!(
        "{} {}",
        palette.id(&detail.node.to_string()),
        activity.display_name
    );
    let fields = [
        ("linked", activity.linked_document_id.clone()),
        ("parent", activity.parent_key.clone()),
        ("start", activity.start_date.clone()),
        ("end", activity.end_date.clone()),
        ("duration", activity.duration.map(|days| days.to_string())),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("  {:<9}{}", palette.dim(label), value);
        }
    }
    if detail.graph_node.is_none() {
        println!("  {}", palette.warn("not shown in the graph: no usable start date"));
    }

    println!("{}", palette.heading("Predecessors"));
    print_links(&detail.predecessors, &palette);
    println!("{}", palette.heading("Successors"));
    print_links(&detail.successors, &palette);
}

fn print_links(links: &[DetailLink], palette: &Palette) {
    if links.is_empty() {
        println!("  {}", palette.dim("none"));
    }
    for link in links {
        println!("  {}", format_link_row(link, palette));
    }
}

fn format_link_row(link: &DetailLink, palette: &Palette) -> String {
    let target = match (&link.resolved, &link.display_name) {
        (Some(node), Some(name)) => format!("{} {}", palette.id(&node.to_string()), name),
        (Some(node), None) => palette.id(&node.to_string()),
        (None, _) => palette.warn(&format!("{} (unresolved)", link.reference)),
    };
    format!("{} {}", target, palette.links(&lag_label(link)))
}

fn lag_label(link: &DetailLink) -> String {
    match link.lag {
        0 => link.link_type.as_str().to_string(),
        lag if lag > 0 => format!("{}+{}", link.link_type, lag),
        lag => format!("{}{}", link.link_type, lag),
    }
}

pub fn print_check(report: &CheckReport) {
    let palette = Palette::auto();
    if report.ok() {
        println!(
            "{}",
            palette.dim(&format!(
                "check ok: {} activities scanned",
                report.activities_scanned
            ))
        );
        return;
    }
    for issue in &report.issues {
        let subject = match &issue.node {
            Some(node) => node.to_string(),
            None => issue.schedule.to_string(),
        };
        println!(
            "{} {} {}",
            palette.warn(issue.kind.as_str()),
            palette.id(&subject),
            issue.message
        );
    }
    println!(
        "{}",
        palette.dim(&format!(
            "{} issue(s) in {} activities",
            report.issues.len(),
            report.activities_scanned
        ))
    );
}

pub fn format_node_list(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    fn id(&self, text: &str) -> String {
        self.paint("1;94", text)
    }

    fn role(&self, role: ScheduleRole) -> String {
        let code = match role {
            ScheduleRole::Master => "37",
            ScheduleRole::Overlay => "35",
        };
        self.paint(code, &format!("[{}]", role.as_str().to_ascii_uppercase()))
    }

    fn links(&self, text: &str) -> String {
        self.paint("90", text)
    }

    fn warn(&self, text: &str) -> String {
        self.paint("33", text)
    }
}

#[cfg(test)]
mod tests {
    use super::{format_link_row, format_node_list, tree_rows, Palette};
    use crate::codec;
    use crate::domain::activity::{Activity, Schedule};
    use crate::domain::link::{LinkType, PredecessorLink};
    use crate::domain::node_id::{ActivityKey, NodeId, ScheduleId};
    use crate::graph::{build, BuildOptions};
    use crate::session::DetailLink;

    fn plain() -> Palette {
        Palette { enabled: false }
    }

    fn schedule() -> ScheduleId {
        ScheduleId::parse("S1").expect("schedule id should parse")
    }

    fn activity(key: &str, parent: Option<&str>) -> Activity {
        let mut act = Activity::new(ActivityKey::Durable(key.to_string()), schedule(), key);
        act.start_date = Some("2024-01-01".to_string());
        act.parent_key = parent.map(str::to_string);
        act
    }

    #[test]
    fn tree_rows_put_children_under_parents() {
        let mut late = activity("c", None);
        late.predecessors_raw = Some(codec::encode(&[PredecessorLink::finish_to_start("a")]));
        let graph = build(
            &[Schedule::master(schedule())],
            &[activity("a", None), activity("b", Some("a")), late],
            &BuildOptions::default(),
        );
        let rows = tree_rows(&graph)
            .into_iter()
            .map(|(depth, node)| (depth, node.id.key.as_str().to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                (0, "a".to_string()),
                (1, "b".to_string()),
                (0, "c".to_string())
            ]
        );
    }

    #[test]
    fn link_rows_show_type_and_signed_lag() {
        let node = NodeId::new(schedule(), ActivityKey::Durable("a".to_string()));
        let resolved = DetailLink {
            reference: "a".to_string(),
            resolved: Some(node.clone()),
            display_name: Some("Survey".to_string()),
            link_type: LinkType::StartToStart,
            lag: -2,
        };
        assert_eq!(format_link_row(&resolved, &plain()), "rec:S1:a Survey SS-2");

        let unresolved = DetailLink {
            reference: "ghost".to_string(),
            resolved: None,
            display_name: None,
            link_type: LinkType::FinishToStart,
            lag: 3,
        };
        assert_eq!(
            format_link_row(&unresolved, &plain()),
            "ghost (unresolved) FS+3"
        );
        assert_eq!(format_node_list(&[node]), "rec:S1:a");
    }
}
