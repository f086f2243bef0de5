//! Human-readable rendering of results for the terminal

use butterfly_wayfinder::{RouteResult, Status, SyncOutcome};

/// One-line summary of a route, `"No route found"` for an empty path
pub fn route_summary(result: &RouteResult) -> String {
    if result.is_empty() {
        "No route found".to_string()
    } else {
        format!("Distance: {:.1} · Hops: {}", result.distance, result.hops)
    }
}

pub fn outcome_summary(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Throttled => "⏸️  Checked recently; using cached graph".to_string(),
        SyncOutcome::UpToDate { sha } => format!("✅ Graph {sha} is up to date"),
        SyncOutcome::Updated { sha } => format!("✅ Graph updated to {sha}"),
        SyncOutcome::Failed { reason } => format!("⚠️  Sync failed: {reason}"),
    }
}

pub fn status_lines(status: &Status) -> Vec<String> {
    let mut lines = Vec::new();
    match &status.sha {
        Some(sha) => {
            lines.push(format!("Graph:        {sha}"));
            lines.push(format!("Nodes:        {}", status.nodes));
            lines.push(format!("Edges:        {}", status.edges));
            if let Some([xmin, ymin, xmax, ymax]) = status.bbox {
                lines.push(format!("Bounds:       [{xmin}, {ymin}, {xmax}, {ymax}]"));
            }
        }
        None => lines.push("Graph:        none cached".to_string()),
    }
    lines.push(match status.last_checked {
        Some(at) => format!("Last checked: {}", at.to_rfc3339()),
        None => "Last checked: never".to_string(),
    });
    lines
}
