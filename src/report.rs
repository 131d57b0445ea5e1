use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use error_stack::Report;

use crate::batch::FileOutcome;
use crate::sync::SyncOutcome;

/// `true` when every file was synced completely.
pub fn overall_success(outcomes: &[FileOutcome]) -> bool {
    outcomes.iter().all(FileOutcome::succeeded)
}

/// Printable attachments of a report, outermost first.
pub fn failure_reasons<C>(report: &Report<C>) -> Vec<String> {
    report
        .frames()
        .filter_map(|frame| {
            frame
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| frame.downcast_ref::<&str>().map(|text| text.to_string()))
        })
        .collect()
}

/// Web link of the synced playlist, `None` for a dry run.
pub fn playlist_url(outcome: &SyncOutcome) -> Option<String> {
    outcome
        .playlist_id
        .as_ref()
        .map(|id| format!("https://open.spotify.com/playlist/{}", id))
}

fn action(outcome: &SyncOutcome) -> &'static str {
    if outcome.dry_run {
        "dry run"
    } else if outcome.created {
        "created"
    } else {
        "updated"
    }
}

fn status_cell(file: &FileOutcome) -> Cell {
    match &file.result {
        Ok(outcome) => match &outcome.aborted {
            None => Cell::new("ok").fg(Color::Green),
            Some(failure) => Cell::new(format!(
                "partial: batch {}/{} failed",
                failure.batch_number, failure.total_batches
            ))
            .fg(Color::Yellow),
        },
        Err(_) => Cell::new("failed").fg(Color::Red),
    }
}

pub fn summary_table(outcomes: &[FileOutcome]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "File",
            "Playlist",
            "Action",
            "Tracks added",
            "Unmatched",
            "Status",
        ]);
    for file in outcomes {
        let row = match &file.result {
            Ok(outcome) => vec![
                Cell::new(&file.filename),
                Cell::new(&outcome.playlist_name),
                Cell::new(action(outcome)),
                Cell::new(outcome.tracks_added),
                Cell::new(outcome.unmatched.len()),
                status_cell(file),
            ],
            Err(_) => vec![
                Cell::new(&file.filename),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(0),
                Cell::new("-"),
                status_cell(file),
            ],
        };
        table.add_row(row);
    }
    table
}

pub fn print_report(outcomes: &[FileOutcome]) {
    println!("{}", summary_table(outcomes));

    for file in outcomes {
        let unmatched = file
            .result
            .as_ref()
            .map(|outcome| outcome.unmatched.as_slice())
            .unwrap_or_default();
        if !unmatched.is_empty() {
            println!("\n{} {}", "Unmatched tracks in".yellow(), file.filename.yellow());
            for track in unmatched {
                println!("  {} - {}", track.title, track.artist);
            }
        }
        if !file.warnings.is_empty() {
            println!("\n{} {}", "Skipped lines in".yellow(), file.filename.yellow());
            for warning in &file.warnings {
                println!("  {}", warning);
            }
        }
        match &file.result {
            Err(report) => {
                println!("\n{} {}", "Failed:".red(), file.filename.red());
                for reason in failure_reasons(report) {
                    println!("  {}", reason);
                }
            }
            Ok(outcome) => {
                if let Some(url) = playlist_url(outcome) {
                    println!("\n{} {}", outcome.playlist_name.green(), url.cyan());
                }
                if let Some(failure) = &outcome.aborted {
                    println!("\n{} {}: {}", "Incomplete:".red(), file.filename.red(), failure);
                    for reason in failure_reasons(&failure.error) {
                        println!("  {}", reason);
                    }
                }
            }
        }
    }

    let failed = outcomes.iter().filter(|file| !file.succeeded()).count();
    if failed == 0 {
        println!("\n{}", format!("All {} playlist file(s) synced", outcomes.len()).green());
    } else {
        println!(
            "\n{}",
            format!("{} of {} playlist file(s) failed", failed, outcomes.len()).red()
        );
    }
}
