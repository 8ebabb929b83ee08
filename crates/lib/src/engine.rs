//! Container engine capability.
//!
//! [`ContainerEngine`] is the seam between matrix orchestration and the
//! machine. [`CliEngine`] drives any docker-compatible CLI (`docker`,
//! `podman`); tests substitute recording fakes.

use std::future::Future;
use std::path::Path;

use crate::exec::{self, ExecError, Invocation};
use crate::image::ImageReference;

pub trait ContainerEngine: Send + Sync {
  /// Build `image` from `dockerfile` using `context` as the build context.
  fn build(
    &self,
    dockerfile: &Path,
    image: &ImageReference,
    context: &Path,
  ) -> impl Future<Output = Result<(), ExecError>> + Send;

  /// Push a previously built image to its registry.
  fn push(&self, image: &ImageReference) -> impl Future<Output = Result<(), ExecError>> + Send;
}

/// A docker-compatible command line engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliEngine {
  program: String,
}

impl CliEngine {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
    }
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn build_invocation(&self, dockerfile: &Path, image: &ImageReference, context: &Path) -> Invocation {
    Invocation::new(&self.program)
      .arg("build")
      .arg("-f")
      .arg(dockerfile.to_string_lossy())
      .arg("-t")
      .arg(image.to_string())
      .arg(context.to_string_lossy())
  }

  pub fn push_invocation(&self, image: &ImageReference) -> Invocation {
    Invocation::new(&self.program).arg("push").arg(image.to_string())
  }
}

impl ContainerEngine for CliEngine {
  async fn build(&self, dockerfile: &Path, image: &ImageReference, context: &Path) -> Result<(), ExecError> {
    exec::run(&self.build_invocation(dockerfile, image, context)).await
  }

  async fn push(&self, image: &ImageReference) -> Result<(), ExecError> {
    exec::run(&self.push_invocation(image)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn image() -> ImageReference {
    ImageReference::new(
      "registry.gitlab.com/termoshtt/accel",
      "ubuntu18.04-cuda10.1-nightly2020-05-01",
      "manual",
    )
  }

  #[test]
  fn build_invocation_tags_image() {
    let engine = CliEngine::new("docker");
    let invocation = engine.build_invocation(
      Path::new("ubuntu18.04-cuda10.1-nightly2020-05-01.Dockerfile"),
      &image(),
      Path::new("."),
    );

    assert_eq!(
      invocation.to_string(),
      "docker build -f ubuntu18.04-cuda10.1-nightly2020-05-01.Dockerfile \
       -t registry.gitlab.com/termoshtt/accel/ubuntu18.04-cuda10.1-nightly2020-05-01:manual ."
    );
  }

  #[test]
  fn push_invocation_uses_full_reference() {
    let engine = CliEngine::new("podman");
    assert_eq!(
      engine.push_invocation(&image()).to_string(),
      "podman push registry.gitlab.com/termoshtt/accel/ubuntu18.04-cuda10.1-nightly2020-05-01:manual"
    );
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn exit_status_maps_to_result() {
    let ok = CliEngine::new("true");
    ok.build(Path::new("x.Dockerfile"), &image(), Path::new(".")).await.unwrap();
    ok.push(&image()).await.unwrap();

    let failing = CliEngine::new("false");
    let result = failing.push(&image()).await;
    assert!(matches!(result, Err(ExecError::Failed { code: Some(1), .. })));
  }
}
