//! Per-command transcript printed in trace mode.

use owo_colors::OwoColorize;

/// Formats a command and its captured output for `--trace`.
///
/// Empty streams are omitted so quiet commands take a single line.
pub(crate) fn trace_message(command: &str, stdout: &str, stderr: &str) -> String {
    let mut message = format!("{} {}\n", heading("Command:"), command.bold());
    if !stdout.is_empty() {
        message.push_str(&format!("{}\n{}", heading("Stdout:"), stdout));
        if !stdout.ends_with('\n') {
            message.push('\n');
        }
    }
    if !stderr.is_empty() {
        message.push_str(&format!("{}\n{}", heading("Stderr:"), stderr));
        if !stderr.ends_with('\n') {
            message.push('\n');
        }
    }
    message
}

fn heading(text: &str) -> String {
    text.green().bold().underline().to_string()
}
