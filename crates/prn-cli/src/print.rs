//! Human-readable status output.

use prn_proto::v1 as pb;

/// Prints a one-row table with the process id, state, and command line.
pub fn print_status_table(id: &str, status: Option<&pb::ProcessStatus>, process: Option<&pb::Process>) {
    let state = status.map_or("", |st| match st.state() {
        pb::ProcessState::Running => "Running",
        pb::ProcessState::Stopped => "Stopped",
        pb::ProcessState::Unspecified => "Unknown",
    });

    let command = process.map_or_else(String::new, |p| {
        let mut parts = vec![p.command.clone()];
        parts.extend(p.args.iter().cloned());
        parts.join(" ").trim().to_string()
    });

    let id_width = id.len().max(36);
    let state_width = state.len().max(7);
    let command_width = command.len().max(7);

    let separator = format!(
        "+-{}-+-{}-+-{}-+",
        "-".repeat(id_width),
        "-".repeat(state_width),
        "-".repeat(command_width)
    );
    println!("{separator}");
    println!(
        "| {:<id_width$} | {:<state_width$} | {:<command_width$} |",
        "ID", "STATE", "COMMAND"
    );
    println!("{separator}");
    println!("| {id:<id_width$} | {state:<state_width$} | {command:<command_width$} |");
    println!("{separator}");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rendering must not panic on absent fields.
    #[test]
    fn handles_missing_status_and_process() {
        print_status_table("abc", None, None);
    }

    #[test]
    fn handles_populated_row() {
        let status = pb::ProcessStatus {
            state: pb::ProcessState::Stopped.into(),
            exit_code: Some(0),
            start_time: None,
            end_time: None,
        };
        let process = pb::Process {
            command: "sh".into(),
            args: vec!["-c".into(), "echo hi".into()],
        };
        print_status_table("abc", Some(&status), Some(&process));
    }
}
