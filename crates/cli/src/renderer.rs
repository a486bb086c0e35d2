use std::io::{self, Write};

use cctree_core::Experiment;
use cctree_model::{CCNode, MetricStat};

const INDENT: &str = "  ";

/// Write the tree as indented text, one node per line, with the average
/// of every metric.
pub fn render_tree<W: Write>(
    out: &mut W,
    experiment: &Experiment,
    max_depth: Option<usize>,
) -> io::Result<()> {
    render_node(out, experiment, experiment.root(), 1, max_depth)
}

fn render_node<W: Write>(
    out: &mut W,
    experiment: &Experiment,
    node: &CCNode,
    depth: usize,
    max_depth: Option<usize>,
) -> io::Result<()> {
    if max_depth.is_some_and(|max| depth > max) {
        return Ok(());
    }

    write!(out, "{}{} [{}]", INDENT.repeat(depth - 1), label(experiment, node), node.id)?;
    for (metric, name) in experiment.metric_names().iter().enumerate() {
        if let Some(avg) = node.metric(metric, MetricStat::Avg) {
            write!(out, " {name}={avg:.3}")?;
        }
    }
    writeln!(out)?;

    for child in &node.children {
        render_node(out, experiment, child, depth + 1, max_depth)?;
    }
    Ok(())
}

fn label(experiment: &Experiment, node: &CCNode) -> String {
    if let Some(name) = node.name() {
        return name.to_string();
    }
    let file = experiment.file_name(node).unwrap_or("?");
    match node.end_line {
        Some(line) => format!("{} {file}:{line}", node.element_kind()),
        None => format!("{} {file}", node.element_kind()),
    }
}
