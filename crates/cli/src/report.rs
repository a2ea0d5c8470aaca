//! Terminal rendering of session summaries and resolution reports.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use portsync_core::models::{ResolutionOutcome, ResolutionReport, SessionSummary};

use crate::style;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 10 {
        &sha[..10]
    } else {
        sha
    }
}

fn outcome_cell(outcome: &ResolutionOutcome) -> Cell {
    let cell = Cell::new(outcome.to_string());
    match outcome {
        ResolutionOutcome::AutoResolved => cell.fg(Color::Green),
        ResolutionOutcome::ManualRequired => cell.fg(Color::Yellow),
        ResolutionOutcome::Skipped(_) | ResolutionOutcome::ToolFailure => cell.fg(Color::Red),
    }
}

/// Print the session table followed by the per-entry resolution table.
pub fn print_summary(summary: &SessionSummary) {
    println!();
    println!("{}", style::header("Sync Summary"));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "Value"]);

    table.add_row(vec![Cell::new("Branch"), Cell::new(&summary.branch)]);
    table.add_row(vec![Cell::new("Merge"), Cell::new(summary.merge.to_string())]);
    if let Some(ref report) = summary.resolution {
        table.add_row(vec![
            Cell::new("Conflicts"),
            Cell::new(format!(
                "{} auto-resolved, {} manual, {} skipped, {} tool failures",
                report.auto_resolved(),
                report.manual_required(),
                report.skipped(),
                report.tool_failures()
            )),
        ]);
        table.add_row(vec![
            Cell::new("Commit"),
            Cell::new(report.commit.as_deref().map(short_sha).unwrap_or("—")),
        ]);
    }
    table.add_row(vec![Cell::new("Built"), Cell::new(yes_no(summary.built))]);
    table.add_row(vec![Cell::new("Pushed"), Cell::new(yes_no(summary.pushed))]);
    table.add_row(vec![
        Cell::new("Started"),
        Cell::new(summary.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
    ]);
    if let Some(completed) = summary.completed_at {
        table.add_row(vec![
            Cell::new("Completed"),
            Cell::new(completed.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    println!("{}", table);

    if let Some(ref report) = summary.resolution {
        print_resolution(report);
    }
}

/// Print one row per conflicted entry.
pub fn print_resolution(report: &ResolutionReport) {
    println!();
    if report.entries.is_empty() {
        println!("{}", style::success("No conflicted entries"));
        println!();
        return;
    }

    println!(
        "{}",
        style::header(&format!("Conflicted Entries ({})", report.entries.len()))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Outcome", "Merged artifact"]);

    for entry in &report.entries {
        let merged = entry
            .artifacts
            .as_ref()
            .map(|a| a.merged.display().to_string())
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(&entry.entry.path),
            outcome_cell(&entry.outcome),
            Cell::new(merged),
        ]);
    }
    println!("{}", table);
    println!();

    if report.needs_manual_follow_up() {
        println!(
            "{}",
            style::warn("Some entries need manual resolution; see the recovery directory")
        );
        println!();
    }
}
