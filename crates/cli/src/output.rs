// Output rendering for the CLI.
//
// A terminal gets human text. Anything else, or `--json`, gets JSON Lines:
// one object per line on stdout, diagnostics as objects on stderr.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use tandem_client::{ExecutionError, SessionError};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    /// One JSON object per line.
    Json,
}

impl OutputFormat {
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            Self::Json
        } else {
            Self::detect_from_terminal(io::stdout().is_terminal())
        }
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Emit one record on stdout.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut stdout = io::stdout().lock();
    write_output(&mut stdout, format, value, human)?;
    stdout.flush()
}

pub fn write_output<W, T, F>(writer: &mut W, format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    if format == OutputFormat::Human {
        return writeln!(writer, "{}", human(value));
    }
    let line = serde_json::to_string(value).map_err(io::Error::other)?;
    writeln!(writer, "{line}")
}

pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_diagnostic(format, Severity::Error, code, message);
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_diagnostic(format, Severity::Warning, code, message);
}

#[derive(Debug, Clone, Copy)]
enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Error => ANSI_RED,
            Self::Warning => ANSI_YELLOW,
        }
    }
}

fn print_diagnostic(format: OutputFormat, severity: Severity, code: &str, message: &str) {
    let line = match format {
        OutputFormat::Human => render_human_stderr_line(severity, message, io::stderr().is_terminal()),
        OutputFormat::Json => render_json_diagnostic(severity, code, message),
    };
    let _ = writeln!(io::stderr().lock(), "{line}");
}

fn render_json_diagnostic(severity: Severity, code: &str, message: &str) -> String {
    let body = serde_json::json!({ "code": code, "message": message });
    serde_json::Value::Object(serde_json::Map::from_iter([(severity.label().to_owned(), body)])).to_string()
}

fn render_human_stderr_line(severity: Severity, message: &str, is_tty: bool) -> String {
    let label = severity.label();
    if is_tty {
        format!("{}{label}:{ANSI_RESET} {message}", severity.color())
    } else {
        format!("{label}: {message}")
    }
}

/// Report a failed command with a stable code and, where one exists, a hint.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    for cause in error.chain() {
        match cause.downcast_ref::<SessionError>() {
            Some(SessionError::Closed) => {
                return (
                    "RELAY_UNAVAILABLE",
                    format!("{message}. Check that a relay is running (tandem-relay) and that relay_url is correct"),
                );
            }
            Some(SessionError::InvalidUrl { .. }) => return ("INVALID_RELAY_URL", message),
            _ => {}
        }
        if let Some(ExecutionError::Rejected { .. }) = cause.downcast_ref::<ExecutionError>() {
            return ("EXECUTION_REJECTED", message);
        }
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") {
        return ("NETWORK_TIMEOUT", message);
    }
    if lower.contains("file") && lower.contains("not found") {
        return ("FILE_NOT_FOUND", format!("{message}. Run: tandem files list"));
    }

    ("ERROR", message)
}
