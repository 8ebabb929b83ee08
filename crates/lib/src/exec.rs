//! External command execution.
//!
//! Every side effect this crate has on the machine goes through [`run`]: the
//! package manager during provisioning and the container engine during matrix
//! builds. The child inherits stdout and stderr so its own diagnostics reach
//! the user unmodified.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The program could not be started at all (not installed, not executable).
  #[error("failed to start `{program}`: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The program ran and exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {command}")]
  Failed { command: String, code: Option<i32> },
}

/// A fully specified external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " '{}'", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

/// Run an invocation to completion.
///
/// Stdin is closed; stdout and stderr are inherited from this process. There
/// is no timeout: a hung child blocks the caller.
pub async fn run(invocation: &Invocation) -> Result<(), ExecError> {
  info!(command = %invocation, "running");

  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .stdin(Stdio::null())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit());

  if let Some(cwd) = &invocation.cwd {
    command.current_dir(cwd);
  }

  debug!(program = %invocation.program, cwd = ?invocation.cwd, "spawning process");

  let status = command.status().await.map_err(|source| ExecError::Spawn {
    program: invocation.program.clone(),
    source,
  })?;

  if !status.success() {
    return Err(ExecError::Failed {
      command: invocation.to_string(),
      code: status.code(),
    });
  }

  Ok(())
}
