//! Terminal and JSON output for imgmatrix commands.
//!
//! Status lines go to stdout, failures and warnings to stderr. Colors are
//! applied only when the stream supports them.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use imgmatrix_lib::build::TargetOutcome;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// Indented, dimmed line naming a path, used under a summary line.
pub fn print_path(path: &Path) {
  println!(
    "  {} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    path.display()
  );
}

/// Report line for one matrix target. `verb` says how far a successful target got.
pub fn format_outcome(outcome: &TargetOutcome, verb: &str) -> String {
  match &outcome.error {
    None => format!(
      "{} {} {} ({}, {})",
      outcome.identity,
      symbols::ARROW,
      outcome.image,
      verb,
      format_duration(outcome.elapsed)
    ),
    Some(e) => format!("{}: {}", outcome.identity, e),
  }
}

pub fn print_outcome(outcome: &TargetOutcome, verb: &str) {
  let line = format_outcome(outcome, verb);
  if outcome.is_success() {
    print_success(&line);
  } else {
    print_error(&line);
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
