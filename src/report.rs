//! Plain-text rendering of configuration, runs and history.

use std::fmt::Write as _;

use crate::executor::StageEvent;
use crate::ledger::{PipelineRun, RunLedger, StageTransition};
use crate::stages::StageList;

const EMPTY: &str = "—";

/// `$0.0123`, or a dash when the provider reported no cost.
pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(cost) => format!("${cost:.4}"),
        None => EMPTY.to_string(),
    }
}

/// Seconds with one decimal, or a dash when the stage never finished.
pub fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
        None => EMPTY.to_string(),
    }
}

fn format_tokens(tokens: Option<u64>) -> String {
    tokens.map_or_else(|| EMPTY.to_string(), |t| t.to_string())
}

pub fn status_line(stages: &StageList, running: bool) -> String {
    format!(
        "{} of {} stages enabled · {}",
        stages.enabled_count(),
        stages.len(),
        if running { "Pipeline running..." } else { "Ready to run" }
    )
}

pub fn render_stages(stages: &StageList) -> String {
    let mut out = String::new();
    for stage in stages.as_slice() {
        let _ = writeln!(
            out,
            "[{}] {:<10} {:<32} t={:.2}  ({})",
            if stage.enabled { "x" } else { " " },
            stage.id,
            stage.model_id,
            stage.temperature,
            stage.label
        );
    }
    out
}

/// One line per live transition.
pub fn render_event(event: &StageEvent) -> String {
    match &event.transition {
        StageTransition::Started { .. } => format!("▶ {} running", event.stage_id),
        StageTransition::Completed {
            duration_ms,
            response,
            ..
        } => format!(
            "✓ {} complete in {} (cost {}, tokens {})",
            event.stage_id,
            format_duration(Some(*duration_ms)),
            format_cost(response.cost),
            format_tokens(response.total_tokens())
        ),
        StageTransition::Failed {
            duration_ms, error, ..
        } => format!(
            "✗ {} failed after {}: {}",
            event.stage_id,
            format_duration(Some(*duration_ms)),
            error
        ),
    }
}

/// Full report for one run: problem, totals, then each stage in order.
pub fn render_run(run: &PipelineRun) -> String {
    let summary = run.summary();
    let mut out = String::new();
    let _ = writeln!(out, "Run {} ({})", run.id, run.created_at.to_rfc3339());
    let _ = writeln!(out, "Problem:\n{}\n", run.problem);
    let _ = writeln!(
        out,
        "Total cost: {}  Total tokens: {}",
        format_cost(summary.total_cost),
        format_tokens(summary.total_tokens)
    );

    for stage in &run.stages {
        let _ = writeln!(
            out,
            "\n## {} [{}] {}",
            stage.stage_label,
            stage.status.as_str(),
            stage.model_id
        );
        let _ = writeln!(
            out,
            "cost {}  tokens {}  duration {}",
            format_cost(stage.cost()),
            format_tokens(stage.total_tokens()),
            format_duration(stage.duration_ms)
        );
        match (&stage.error, &stage.output) {
            (Some(error), _) => {
                let _ = writeln!(out, "error: {error}");
            }
            (None, Some(output)) if !output.is_empty() => {
                let _ = writeln!(out, "{output}");
            }
            _ => {
                let _ = writeln!(out, "No output yet.");
            }
        }
    }
    out
}

/// Newest-first history, marking the selected run.
pub fn render_history(runs: &RunLedger, selected_id: Option<&str>) -> String {
    let selected = runs.selected(selected_id).map(|r| r.id.as_str());
    let mut out = String::new();
    for run in runs.runs() {
        let summary = run.summary();
        let headline: String = run
            .problem
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(60)
            .collect();
        let _ = writeln!(
            out,
            "{} {}  {}  {}/{} complete  {}  {}",
            if Some(run.id.as_str()) == selected { "*" } else { " " },
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M"),
            summary.complete,
            run.stages.len(),
            format_cost(summary.total_cost),
            headline
        );
    }
    out
}
