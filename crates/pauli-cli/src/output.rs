//! Status lines printed around script runs.
//!
//! Script output owns stdout, so everything pauli says itself goes to
//! stderr.

use std::time::Duration;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Formats a duration the way a person reads it (e.g. "1.2s", "2m05s").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if elapsed.as_secs() < 60 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Line summarizing a finished script run.
#[must_use]
pub fn finished_line(command: &str, status: i32, elapsed: Duration) -> String {
    let took = format_duration(elapsed);
    if status == 0 {
        format!("{GREEN}✓{RESET} {BOLD}{command}{RESET} finished {DIM}in {took}{RESET}")
    } else {
        format!("{RED}✗{RESET} {BOLD}{command}{RESET} failed with exit code {status} {DIM}after {took}{RESET}")
    }
}

/// Prints the summary of a finished script run.
#[allow(clippy::print_stderr)]
pub fn finished(command: &str, status: i32, elapsed: Duration) {
    eprintln!("{}", finished_line(command, status, elapsed));
}

/// Prints a notice that the run was interrupted.
#[allow(clippy::print_stderr)]
pub fn interrupted(command: &str, container: &str) {
    eprintln!(
        "{YELLOW}!{RESET} {BOLD}{command}{RESET} interrupted, {container} stopped {DIM}(kept for reuse){RESET}"
    );
}

/// Prints a created or kept project file.
#[allow(clippy::print_stderr)]
pub fn file_written(path: &str, note: &str) {
    eprintln!("  {GREEN}●{RESET} {BOLD}{path}{RESET} {DIM}{note}{RESET}");
}
