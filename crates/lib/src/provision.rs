//! Toolchain provisioning.
//!
//! Provisioning runs four steps against a [`Toolchain`], in order:
//!
//! 1. install the channel
//! 2. add the formatting component to it
//! 3. add the cross-compilation target to it
//! 4. force-install the linker helper tool
//!
//! The first failing step aborts the rest. Earlier steps are not rolled back;
//! each is idempotent on the toolchain side, so a failed run is retried from
//! the top.

use std::fmt;

use thiserror::Error;
use tracing::{error, info};

use crate::consts::{DEFAULT_COMPONENT, DEFAULT_TARGET, DEFAULT_TOOL};
use crate::exec::ExecError;
use crate::toolchain::Toolchain;

/// What gets installed alongside a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSpec {
  pub component: String,
  pub target: String,
  pub tool: String,
}

impl Default for ProvisionSpec {
  fn default() -> Self {
    Self {
      component: DEFAULT_COMPONENT.to_string(),
      target: DEFAULT_TARGET.to_string(),
      tool: DEFAULT_TOOL.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStep {
  AddChannel,
  AddComponent,
  AddTarget,
  InstallTool,
}

impl fmt::Display for ProvisionStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ProvisionStep::AddChannel => "add channel",
      ProvisionStep::AddComponent => "add component",
      ProvisionStep::AddTarget => "add target",
      ProvisionStep::InstallTool => "install tool",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
#[error("provisioning channel '{channel}' failed at step '{step}': {source}")]
pub struct ProvisionError {
  pub step: ProvisionStep,
  pub channel: String,
  #[source]
  pub source: ExecError,
}

pub struct Provisioner<T> {
  toolchain: T,
  spec: ProvisionSpec,
}

impl<T: Toolchain> Provisioner<T> {
  pub fn new(toolchain: T, spec: ProvisionSpec) -> Self {
    Self { toolchain, spec }
  }

  pub fn spec(&self) -> &ProvisionSpec {
    &self.spec
  }

  pub fn into_toolchain(self) -> T {
    self.toolchain
  }

  /// Run all provisioning steps for `channel`, stopping at the first failure.
  pub async fn provision(&self, channel: &str) -> Result<(), ProvisionError> {
    info!(channel = %channel, "provisioning toolchain");

    let fail = move |step: ProvisionStep| {
      move |source: ExecError| {
        error!(channel = %channel, step = %step, error = %source, "provisioning step failed");
        ProvisionError {
          step,
          channel: channel.to_string(),
          source,
        }
      }
    };

    self
      .toolchain
      .add_channel(channel)
      .await
      .map_err(fail(ProvisionStep::AddChannel))?;

    self
      .toolchain
      .add_component(channel, &self.spec.component)
      .await
      .map_err(fail(ProvisionStep::AddComponent))?;

    self
      .toolchain
      .add_target(channel, &self.spec.target)
      .await
      .map_err(fail(ProvisionStep::AddTarget))?;

    self
      .toolchain
      .install_tool(&self.spec.tool)
      .await
      .map_err(fail(ProvisionStep::InstallTool))?;

    info!(channel = %channel, "toolchain provisioned");
    Ok(())
  }
}
