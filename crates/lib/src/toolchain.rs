//! Compiler toolchain capability.
//!
//! Provisioning mutates machine-wide toolchain state, so it is expressed as
//! the [`Toolchain`] trait and injected into the
//! [`Provisioner`](crate::provision::Provisioner). [`Rustup`] is the real
//! implementation backed by `rustup` and `cargo`.

use std::future::Future;

use crate::exec::{self, ExecError, Invocation};

pub trait Toolchain {
  /// Install a release channel, or do nothing if it is already present.
  fn add_channel(&self, channel: &str) -> impl Future<Output = Result<(), ExecError>> + Send;

  /// Add an optional component to a channel.
  fn add_component(&self, channel: &str, component: &str) -> impl Future<Output = Result<(), ExecError>> + Send;

  /// Add a compilation target to a channel.
  fn add_target(&self, channel: &str, target: &str) -> impl Future<Output = Result<(), ExecError>> + Send;

  /// Install a tool globally, replacing any existing installation.
  fn install_tool(&self, tool: &str) -> impl Future<Output = Result<(), ExecError>> + Send;
}

/// `rustup`/`cargo` backed toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rustup {
  rustup: String,
  cargo: String,
}

impl Default for Rustup {
  fn default() -> Self {
    Self::new("rustup", "cargo")
  }
}

impl Rustup {
  pub fn new(rustup: impl Into<String>, cargo: impl Into<String>) -> Self {
    Self {
      rustup: rustup.into(),
      cargo: cargo.into(),
    }
  }

  pub fn add_channel_invocation(&self, channel: &str) -> Invocation {
    Invocation::new(&self.rustup).args(["toolchain", "add", channel])
  }

  pub fn add_component_invocation(&self, channel: &str, component: &str) -> Invocation {
    Invocation::new(&self.rustup).args(["component", "add", component, "--toolchain", channel])
  }

  pub fn add_target_invocation(&self, channel: &str, target: &str) -> Invocation {
    Invocation::new(&self.rustup).args(["target", "add", target, "--toolchain", channel])
  }

  pub fn install_tool_invocation(&self, tool: &str) -> Invocation {
    Invocation::new(&self.cargo).args(["install", tool, "-f"])
  }
}

impl Toolchain for Rustup {
  async fn add_channel(&self, channel: &str) -> Result<(), ExecError> {
    exec::run(&self.add_channel_invocation(channel)).await
  }

  async fn add_component(&self, channel: &str, component: &str) -> Result<(), ExecError> {
    exec::run(&self.add_component_invocation(channel, component)).await
  }

  async fn add_target(&self, channel: &str, target: &str) -> Result<(), ExecError> {
    exec::run(&self.add_target_invocation(channel, target)).await
  }

  async fn install_tool(&self, tool: &str) -> Result<(), ExecError> {
    exec::run(&self.install_tool_invocation(tool)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invocations_scope_to_channel() {
    let rustup = Rustup::default();

    assert_eq!(
      rustup.add_channel_invocation("nightly-2020-05-01").to_string(),
      "rustup toolchain add nightly-2020-05-01"
    );
    assert_eq!(
      rustup.add_component_invocation("nightly-2020-05-01", "rustfmt").to_string(),
      "rustup component add rustfmt --toolchain nightly-2020-05-01"
    );
    assert_eq!(
      rustup
        .add_target_invocation("nightly-2020-05-01", "nvptx64-nvidia-cuda")
        .to_string(),
      "rustup target add nvptx64-nvidia-cuda --toolchain nightly-2020-05-01"
    );
  }

  #[test]
  fn tool_install_is_forced() {
    let rustup = Rustup::new("/opt/rustup", "/opt/cargo");
    assert_eq!(
      rustup.install_tool_invocation("ptx-linker").to_string(),
      "/opt/cargo install ptx-linker -f"
    );
  }

  #[tokio::test]
  async fn missing_rustup_surfaces_spawn_error() {
    let rustup = Rustup::new("imgmatrix-no-such-rustup", "imgmatrix-no-such-cargo");
    let result = rustup.add_channel("nightly").await;
    assert!(matches!(result, Err(ExecError::Spawn { .. })));
  }
}
