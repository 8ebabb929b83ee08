//! Implementation of the `imgmatrix provision` command.
//!
//! Installs a toolchain channel together with its formatting component,
//! cross-compilation target and the globally installed linker tool.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use imgmatrix_lib::config::{FileConfig, ProvisionConfig, ProvisionOverrides};
use imgmatrix_lib::exec::{ExecError, Invocation};
use imgmatrix_lib::provision::Provisioner;
use imgmatrix_lib::toolchain::{Rustup, Toolchain};

use crate::output::{OutputFormat, format_duration, print_info, print_json, print_stat, print_success};

/// Collects the commands `Rustup` would run instead of running them.
struct DryRunToolchain {
  rustup: Rustup,
  planned: Mutex<Vec<Invocation>>,
}

impl DryRunToolchain {
  fn new(rustup: Rustup) -> Self {
    Self {
      rustup,
      planned: Mutex::new(Vec::new()),
    }
  }

  fn record(&self, invocation: Invocation) -> Result<(), ExecError> {
    self
      .planned
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(invocation);
    Ok(())
  }

  fn into_planned(self) -> Vec<Invocation> {
    self.planned.into_inner().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Toolchain for DryRunToolchain {
  async fn add_channel(&self, channel: &str) -> Result<(), ExecError> {
    self.record(self.rustup.add_channel_invocation(channel))
  }

  async fn add_component(&self, channel: &str, component: &str) -> Result<(), ExecError> {
    self.record(self.rustup.add_component_invocation(channel, component))
  }

  async fn add_target(&self, channel: &str, target: &str) -> Result<(), ExecError> {
    self.record(self.rustup.add_target_invocation(channel, target))
  }

  async fn install_tool(&self, tool: &str) -> Result<(), ExecError> {
    self.record(self.rustup.install_tool_invocation(tool))
  }
}

/// Execute the provision command.
///
/// Steps run in order and the first failure aborts the rest; the failing
/// step's own output has already been passed through to the terminal.
pub fn cmd_provision(
  channel: &str,
  overrides: ProvisionOverrides,
  config: Option<&Path>,
  dry_run: bool,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();
  let file = FileConfig::discover(config).context("Failed to load config")?;
  let settings = ProvisionConfig::resolve(file, overrides);
  debug!(rustup = %settings.rustup, cargo = %settings.cargo, "resolved provision configuration");
  let rustup = Rustup::new(&settings.rustup, &settings.cargo);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  if dry_run {
    let provisioner = Provisioner::new(DryRunToolchain::new(rustup), settings.spec);
    rt.block_on(provisioner.provision(channel))?;
    let commands: Vec<String> = provisioner
      .into_toolchain()
      .into_planned()
      .iter()
      .map(ToString::to_string)
      .collect();

    if output.is_json() {
      print_json(&serde_json::json!({ "channel": channel, "dry_run": true, "commands": commands }))?;
    } else {
      print_info("Dry run - no commands executed");
      for command in &commands {
        println!("  {}", command);
      }
    }
    return Ok(());
  }

  let provisioner = Provisioner::new(rustup, settings.spec);
  rt.block_on(provisioner.provision(channel))
    .with_context(|| format!("Failed to provision toolchain '{}'", channel))?;

  if output.is_json() {
    let spec = provisioner.spec();
    print_json(&serde_json::json!({
      "channel": channel,
      "component": spec.component,
      "target": spec.target,
      "tool": spec.tool,
      "elapsed_ms": start.elapsed().as_millis(),
    }))?;
  } else {
    println!();
    print_success(&format!("Toolchain {} provisioned", channel));
    let spec = provisioner.spec();
    print_stat("Component", &spec.component);
    print_stat("Target", &spec.target);
    print_stat("Tool", &spec.tool);
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  #[tokio::test]
  async fn dry_run_records_rustup_commands() {
    let toolchain = DryRunToolchain::new(Rustup::default());

    toolchain.add_channel("nightly").await.unwrap();
    toolchain.install_tool("ptx-linker").await.unwrap();

    let planned: Vec<String> = toolchain.into_planned().iter().map(ToString::to_string).collect();
    assert_eq!(planned, vec!["rustup toolchain add nightly", "cargo install ptx-linker -f"]);
  }

  #[tokio::test]
  async fn dry_run_keeps_recording_after_poisoned_lock() {
    let toolchain = Arc::new(DryRunToolchain::new(Rustup::default()));
    toolchain.add_channel("nightly").await.unwrap();

    let poisoner = toolchain.clone();
    let _ = std::thread::spawn(move || {
      let _guard = poisoner.planned.lock().unwrap();
      panic!("poison the lock");
    })
    .join();
    assert!(toolchain.planned.is_poisoned());

    toolchain.add_target("nightly", "nvptx64-nvidia-cuda").await.unwrap();

    let toolchain = Arc::into_inner(toolchain).unwrap();
    assert_eq!(toolchain.into_planned().len(), 2);
  }
}
