//! Output formatting for response bodies and socket events.

use std::io::{self, Write};

use serde_json::Value;

use crate::cli::OutputFormat;

pub fn render_value(format: OutputFormat, value: &Value) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value),
        OutputFormat::JsonCompact => serde_json::to_string(value),
        OutputFormat::Plain => match value {
            Value::String(text) => Ok(text.clone()),
            Value::Null => Ok(String::new()),
            other => serde_json::to_string(other),
        },
    }
}

/// Print to stdout; empty output prints nothing.
pub fn print_output(output: &str) -> io::Result<()> {
    if output.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}")?;
    stdout.flush()
}

pub fn print_bytes(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()
}
