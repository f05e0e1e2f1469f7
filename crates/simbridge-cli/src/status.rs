//! Console rendering of procedure snapshots.

use colored::{ColoredString, Colorize};
use simbridge_types::{LinkState, ProcedureSnapshot, Side, StageInfo, StatusCode};

fn side_label(side: Side) -> &'static str {
    match side {
        Side::ExternalSystem => "ES",
        Side::ProcessModel => "PM",
    }
}

/// One status line without colour codes.
pub fn status_line(snapshot: &ProcedureSnapshot) -> String {
    let stats = &snapshot.statistics;
    let mut line = format!(
        "{} {:<12} {:<6} {:<17} adapter={}/{} reads={} writes={} dropped={} failures={}",
        side_label(snapshot.side),
        snapshot.state.as_str(),
        snapshot.status.as_str(),
        snapshot.activity.as_str(),
        snapshot.adapter_state,
        snapshot.adapter_status,
        stats.reads_ok,
        stats.writes_ok,
        stats.dropped_frames,
        stats.read_failures
            + stats.write_failures
            + stats.command_failures
            + stats.command_read_failures,
    );
    if let Some(message) = &snapshot.status_message {
        line.push_str(" | ");
        line.push_str(message);
    }
    line
}

/// [`status_line`] coloured by health.
pub fn colored_status_line(snapshot: &ProcedureSnapshot) -> ColoredString {
    let line = status_line(snapshot);
    match (snapshot.state, snapshot.status) {
        (LinkState::Error, _) | (_, StatusCode::Nok) => line.red(),
        (LinkState::Connected, StatusCode::Ok) => line.green(),
        _ => line.yellow(),
    }
}

/// Pipeline listing printed at startup.
pub fn stage_lines(stages: &[StageInfo]) -> Vec<String> {
    stages
        .iter()
        .map(|stage| {
            let commands: Vec<&str> = stage.commands.iter().map(|c| c.id.as_str()).collect();
            format!(
                "[{}] {} ({}) commands: {}",
                stage.sequence,
                stage.id,
                stage.kind,
                if commands.is_empty() { "-".to_string() } else { commands.join(", ") }
            )
        })
        .collect()
}
