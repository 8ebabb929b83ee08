//! Implementation of the `imgmatrix build-matrix` command.
//!
//! Expands the configured axes into targets, then renders, builds and pushes
//! one image per target. `clean` removes rendered build files and `list`
//! shows the expansion without side effects.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::debug;

use imgmatrix_lib::build::{self, BuildError, BuildMode, MatrixReport};
use imgmatrix_lib::config::{EnvConfig, FileConfig, MatrixConfig, MatrixOverrides};
use imgmatrix_lib::engine::CliEngine;

use crate::output::{
  OutputFormat, format_duration, print_info, print_json, print_outcome, print_path, print_stat, print_success,
  print_warning, symbols,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixAction {
  Build,
  Clean,
  List,
}

pub fn cmd_build_matrix(
  action: MatrixAction,
  overrides: MatrixOverrides,
  config: Option<&Path>,
  output: OutputFormat,
) -> Result<()> {
  let file = FileConfig::discover(config).context("Failed to load config")?;
  let env = EnvConfig::from_env().context("Invalid environment configuration")?;
  let settings = MatrixConfig::resolve(file, env, overrides).context("Invalid matrix configuration")?;
  debug!(
    registry = %settings.registry,
    tag = %settings.tag,
    engine = %settings.engine,
    targets = settings.axes.len(),
    "resolved matrix configuration"
  );

  match action {
    MatrixAction::Build => run_build(&settings, output),
    MatrixAction::Clean => run_clean(&settings, output),
    MatrixAction::List => run_list(&settings, output),
  }
}

fn run_build(settings: &MatrixConfig, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let engine = Arc::new(CliEngine::new(&settings.engine));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(build::build_all(
    &settings.axes,
    &settings.registry,
    &settings.tag,
    &settings.options,
    engine,
  ));

  let report = match result {
    Ok(report) => report,
    Err(BuildError::TargetsFailed { report }) => report,
    Err(e) => return Err(e).context("Matrix build failed"),
  };

  if output.is_json() {
    print_json(&report_json(&report, settings))?;
  } else {
    print_report(&report, settings.options.mode);
    println!();
    print_stat("Targets", &report.outcomes.len().to_string());
    print_stat("Succeeded", &report.succeeded().count().to_string());
    print_stat("Failed", &report.failed().count().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if !report.is_success() {
    return Err(BuildError::TargetsFailed { report }).context("Matrix build failed");
  }
  Ok(())
}

fn print_report(report: &MatrixReport, mode: BuildMode) {
  let verb = match mode {
    BuildMode::Publish => "pushed",
    BuildMode::Local => "built",
    BuildMode::RenderOnly => "rendered",
  };

  for outcome in &report.outcomes {
    print_outcome(outcome, verb);
  }
}

fn report_json(report: &MatrixReport, settings: &MatrixConfig) -> serde_json::Value {
  let targets: Vec<_> = report
    .outcomes
    .iter()
    .map(|o| {
      serde_json::json!({
        "identity": o.identity,
        "image": o.image,
        "dockerfile": o.dockerfile,
        "status": if o.is_success() { "succeeded" } else { "failed" },
        "error": o.error.as_ref().map(|e| e.to_string()),
        "elapsed_ms": o.elapsed.as_millis(),
      })
    })
    .collect();

  serde_json::json!({
    "registry": settings.registry,
    "tag": settings.tag,
    "success": report.is_success(),
    "failed": report.failed_identities(),
    "targets": targets,
  })
}

fn run_clean(settings: &MatrixConfig, output: OutputFormat) -> Result<()> {
  let work_dir = &settings.options.work_dir;
  let cleaned = build::clean(work_dir, &settings.options.naming)
    .with_context(|| format!("Failed to clean {}", work_dir.display()))?;

  if output.is_json() {
    let removed: Vec<String> = cleaned.removed.iter().map(|p| p.display().to_string()).collect();
    print_json(&serde_json::json!({ "removed": removed }))?;
  } else if cleaned.removed.is_empty() {
    print_warning("No rendered build files to remove");
  } else {
    for path in &cleaned.removed {
      print_path(path);
    }
    print_success(&format!("Removed {} rendered build file(s)", cleaned.removed.len()));
  }

  Ok(())
}

fn run_list(settings: &MatrixConfig, output: OutputFormat) -> Result<()> {
  let planned = build::plan(&settings.axes, &settings.registry, &settings.tag, &settings.options)?;

  if output.is_json() {
    print_json(&serde_json::json!({ "count": planned.len(), "targets": planned }))?;
  } else {
    for p in &planned {
      println!(
        "{} {} {}",
        p.identity,
        symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        p.image
      );
    }
    println!();
    print_info(&format!("{} target(s)", planned.len()));
  }

  Ok(())
}
