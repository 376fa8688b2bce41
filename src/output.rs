// src/output.rs

//! Rendering of delivered lines for the `tailor` binary.

use std::io::{self, Write};

use colored::Colorize;
use tracing::debug;

use crate::types::{ClientId, MessageType};

/// Severity guessed from keywords in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Debug,
    Warning,
    Error,
}

impl Severity {
    /// Keyword classification. The first matching class wins, in the order
    /// debug, warning, error.
    pub fn classify(line: &str) -> Self {
        if line.contains("DEBUG") || line.contains("debug") {
            return Severity::Debug;
        }
        if line.contains("WARN") || line.contains("warning") {
            return Severity::Warning;
        }
        if line.contains("ERR") || line.contains("error") || line.contains("Error") {
            return Severity::Error;
        }
        Severity::Normal
    }
}

/// Turns callback invocations into output lines.
#[derive(Debug, Clone)]
pub struct LinePrinter {
    highlight: bool,
    prefix_ids: bool,
    backfill_lines: usize,
}

impl LinePrinter {
    /// `prefix_ids` tags each line with its client id (useful when several
    /// paths are followed). `backfill_lines` limits how much of a file's
    /// existing content is shown when it starts.
    pub fn new(highlight: bool, prefix_ids: bool, backfill_lines: usize) -> Self {
        Self {
            highlight,
            prefix_ids,
            backfill_lines,
        }
    }

    pub fn render(&self, client_id: ClientId, msg_type: MessageType, lines: &[String]) -> Vec<String> {
        let shown = match msg_type {
            MessageType::NewFileStarted => {
                let skip = lines.len().saturating_sub(self.backfill_lines);
                &lines[skip..]
            }
            MessageType::NewLinesAdded => lines,
        };

        shown
            .iter()
            .map(|line| {
                let body = if self.highlight {
                    paint(line)
                } else {
                    line.clone()
                };
                if self.prefix_ids {
                    format!("[{client_id}] {body}")
                } else {
                    body
                }
            })
            .collect()
    }

    /// Write rendered lines to stdout. Write failures (closed pipe) are
    /// logged and otherwise ignored.
    pub fn print(&self, client_id: ClientId, msg_type: MessageType, lines: &[String]) {
        let rendered = self.render(client_id, msg_type, lines);
        let mut out = io::stdout().lock();
        for line in rendered {
            if let Err(err) = writeln!(out, "{line}") {
                debug!(error = %err, "stdout write failed");
                return;
            }
        }
        let _ = out.flush();
    }
}

fn paint(line: &str) -> String {
    match Severity::classify(line) {
        Severity::Debug => line.cyan().to_string(),
        Severity::Warning => line.black().on_yellow().to_string(),
        Severity::Error => line.black().on_red().to_string(),
        Severity::Normal => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn severity_keywords() {
        assert_eq!(Severity::classify("[DEBUG] cache warm"), Severity::Debug);
        assert_eq!(Severity::classify("WARNING: disk at 90%"), Severity::Warning);
        assert_eq!(Severity::classify("ERROR connection reset"), Severity::Error);
        assert_eq!(Severity::classify("request served"), Severity::Normal);
        // Debug is checked first.
        assert_eq!(Severity::classify("debug: error path taken"), Severity::Debug);
    }

    #[test]
    fn backfill_is_limited_to_the_last_lines() {
        let printer = LinePrinter::new(false, false, 2);
        let lines = owned(&["1", "2", "3"]);
        assert_eq!(
            printer.render(0, MessageType::NewFileStarted, &lines),
            owned(&["2", "3"])
        );
        assert_eq!(
            printer.render(0, MessageType::NewLinesAdded, &lines),
            owned(&["1", "2", "3"])
        );
    }

    #[test]
    fn client_ids_prefix_lines_when_requested() {
        let printer = LinePrinter::new(false, true, 10);
        assert_eq!(
            printer.render(4, MessageType::NewLinesAdded, &owned(&["x"])),
            owned(&["[4] x"])
        );
    }
}
