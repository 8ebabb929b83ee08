//! Matrix build orchestration.
//!
//! [`build_all`] expands an [`AxisSet`], renders one build file per target and
//! hands each file to a [`ContainerEngine`] to build and push. Targets are
//! independent:
//! - a failing target never stops the others
//! - targets run on a `JoinSet` bounded by `jobs` permits
//! - the report lists outcomes in matrix order regardless of completion order
//!
//! Pushed images are not rolled back when other targets fail.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::consts::DOCKERFILE_SUFFIX;
use crate::engine::ContainerEngine;
use crate::exec::ExecError;
use crate::image::ImageReference;
use crate::matrix::{AxisSet, BuildTarget, Naming, Tokens};
use crate::template;

/// How far each target is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
  /// Render, build and push.
  #[default]
  Publish,
  /// Render and build, skip the push.
  Local,
  /// Render only; the engine is never invoked.
  RenderOnly,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Directory holding `<family>.Dockerfile` templates.
  pub template_dir: PathBuf,
  /// Directory rendered build files are written to.
  pub work_dir: PathBuf,
  /// Build context passed to the engine.
  pub context_dir: PathBuf,
  pub naming: Naming,
  pub tokens: Tokens,
  /// Maximum targets processed at once. Zero is treated as one.
  pub jobs: usize,
  pub mode: BuildMode,
  /// Restrict the run to these identities. Empty means every target.
  pub only: Vec<String>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      template_dir: PathBuf::from("."),
      work_dir: PathBuf::from("."),
      context_dir: PathBuf::from("."),
      naming: Naming::default(),
      tokens: Tokens::default(),
      jobs: 1,
      mode: BuildMode::default(),
      only: Vec::new(),
    }
  }
}

/// Errors for a single target. Recorded in the report, never propagated.
#[derive(Debug, Error)]
pub enum TargetError {
  #[error("failed to read template {path}: {source}")]
  Template {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("image build failed: {0}")]
  Build(#[source] ExecError),

  #[error("image push failed: {0}")]
  Push(#[source] ExecError),

  #[error("target task aborted before completing")]
  Aborted,
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("unknown target(s): {}", .unknown.join(", "))]
  UnknownTargets { unknown: Vec<String> },

  #[error("target identity '{identity}' is produced by more than one axis combination")]
  DuplicateIdentity { identity: String },

  #[error("{} of {} target(s) failed: {}", .report.failed().count(), .report.outcomes.len(), .report.failed_identities().join(", "))]
  TargetsFailed { report: MatrixReport },
}

/// A target with everything derived from it for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTarget {
  pub target: BuildTarget,
  pub identity: String,
  pub image: ImageReference,
  pub dockerfile: PathBuf,
}

#[derive(Debug)]
pub struct TargetOutcome {
  pub identity: String,
  pub image: ImageReference,
  pub dockerfile: PathBuf,
  pub elapsed: Duration,
  pub error: Option<TargetError>,
}

impl TargetOutcome {
  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }
}

/// Per-target results of a run, in matrix order.
#[derive(Debug, Default)]
pub struct MatrixReport {
  pub outcomes: Vec<TargetOutcome>,
}

impl MatrixReport {
  pub fn is_success(&self) -> bool {
    self.outcomes.iter().all(TargetOutcome::is_success)
  }

  pub fn succeeded(&self) -> impl Iterator<Item = &TargetOutcome> {
    self.outcomes.iter().filter(|o| o.is_success())
  }

  pub fn failed(&self) -> impl Iterator<Item = &TargetOutcome> {
    self.outcomes.iter().filter(|o| !o.is_success())
  }

  pub fn failed_identities(&self) -> Vec<String> {
    self.failed().map(|o| o.identity.clone()).collect()
  }
}

/// Files removed by [`clean`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
  pub removed: Vec<PathBuf>,
}

/// Path of the template used for a distribution family.
pub fn template_path(template_dir: &Path, family: &str) -> PathBuf {
  template_dir.join(format!("{family}{DOCKERFILE_SUFFIX}"))
}

/// Expand the matrix into planned targets, applying the `only` filter.
pub fn plan(axes: &AxisSet, registry: &str, tag: &str, options: &BuildOptions) -> Result<Vec<PlannedTarget>, BuildError> {
  let planned: Vec<PlannedTarget> = axes
    .targets()
    .map(|target| {
      let identity = target.identity(&options.naming);
      PlannedTarget {
        image: ImageReference::new(registry, identity.clone(), tag),
        dockerfile: options.work_dir.join(options.naming.rendered_file_name(&identity)),
        identity,
        target,
      }
    })
    .collect();

  let mut seen = HashSet::with_capacity(planned.len());
  if let Some(duplicate) = planned.iter().find(|p| !seen.insert(p.identity.as_str())) {
    return Err(BuildError::DuplicateIdentity {
      identity: duplicate.identity.clone(),
    });
  }

  if options.only.is_empty() {
    return Ok(planned);
  }

  let unknown: Vec<String> = options
    .only
    .iter()
    .filter(|id| !planned.iter().any(|p| &p.identity == *id))
    .cloned()
    .collect();
  if !unknown.is_empty() {
    return Err(BuildError::UnknownTargets { unknown });
  }

  Ok(
    planned
      .into_iter()
      .filter(|p| options.only.contains(&p.identity))
      .collect(),
  )
}

/// Render one target's build file from its family template.
///
/// Returns the path written. Rendering the same target twice from an
/// unchanged template writes identical bytes.
pub async fn render_target(planned: &PlannedTarget, options: &BuildOptions) -> Result<PathBuf, TargetError> {
  let template_file = template_path(&options.template_dir, &planned.target.distribution.family);

  let content = tokio::fs::read_to_string(&template_file)
    .await
    .map_err(|source| TargetError::Template {
      path: template_file.clone(),
      source,
    })?;

  let rendered = template::render(&content, &planned.target.bindings(&options.tokens));

  tokio::fs::write(&planned.dockerfile, rendered)
    .await
    .map_err(|source| TargetError::Write {
      path: planned.dockerfile.clone(),
      source,
    })?;

  debug!(identity = %planned.identity, path = %planned.dockerfile.display(), "rendered build file");
  Ok(planned.dockerfile.clone())
}

async fn process_target<E: ContainerEngine>(
  planned: &PlannedTarget,
  options: &BuildOptions,
  engine: &E,
) -> Result<(), TargetError> {
  let dockerfile = render_target(planned, options).await?;

  if options.mode == BuildMode::RenderOnly {
    return Ok(());
  }

  engine
    .build(&dockerfile, &planned.image, &options.context_dir)
    .await
    .map_err(TargetError::Build)?;

  if options.mode == BuildMode::Publish {
    engine.push(&planned.image).await.map_err(TargetError::Push)?;
  }

  Ok(())
}

/// Render, build and publish every target of the matrix.
///
/// Every target is attempted. Returns the report when all targets succeed,
/// otherwise [`BuildError::TargetsFailed`] carrying the same report.
pub async fn build_all<E>(
  axes: &AxisSet,
  registry: &str,
  tag: &str,
  options: &BuildOptions,
  engine: Arc<E>,
) -> Result<MatrixReport, BuildError>
where
  E: ContainerEngine + 'static,
{
  let planned = plan(axes, registry, tag, options)?;

  // Each target then fails its own write and shows up in the report.
  if let Err(e) = tokio::fs::create_dir_all(&options.work_dir).await {
    error!(path = %options.work_dir.display(), error = %e, "failed to create work directory");
  }

  info!(
    targets = planned.len(),
    jobs = options.jobs.max(1),
    mode = ?options.mode,
    "starting matrix build"
  );

  let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));
  let shared_options = Arc::new(options.clone());
  let mut join_set = JoinSet::new();

  for (index, target) in planned.iter().cloned().enumerate() {
    let semaphore = semaphore.clone();
    let options = shared_options.clone();
    let engine = engine.clone();

    join_set.spawn(async move {
      // The semaphore is never closed, so acquisition only waits.
      let _permit = semaphore.acquire().await.ok();

      info!(identity = %target.identity, image = %target.image, "processing target");
      let start = Instant::now();
      let result = process_target(&target, &options, engine.as_ref()).await;
      let elapsed = start.elapsed();

      match &result {
        Ok(()) => info!(identity = %target.identity, "target succeeded"),
        Err(e) => error!(identity = %target.identity, error = %e, "target failed"),
      }

      (
        index,
        TargetOutcome {
          identity: target.identity,
          image: target.image,
          dockerfile: target.dockerfile,
          elapsed,
          error: result.err(),
        },
      )
    });
  }

  let mut slots: Vec<Option<TargetOutcome>> = planned.iter().map(|_| None).collect();

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, outcome)) => slots[index] = Some(outcome),
      Err(e) => error!(error = %e, "target task panicked"),
    }
  }

  let outcomes = slots
    .into_iter()
    .zip(planned)
    .map(|(slot, planned)| {
      slot.unwrap_or_else(|| TargetOutcome {
        identity: planned.identity,
        image: planned.image,
        dockerfile: planned.dockerfile,
        elapsed: Duration::ZERO,
        error: Some(TargetError::Aborted),
      })
    })
    .collect();

  let report = MatrixReport { outcomes };

  info!(
    succeeded = report.succeeded().count(),
    failed = report.failed().count(),
    "matrix build complete"
  );

  if report.is_success() {
    Ok(report)
  } else {
    Err(BuildError::TargetsFailed { report })
  }
}

/// Remove every rendered build file in `work_dir`.
///
/// Only names matching the rendered convention are touched. A missing
/// directory or an empty one is a no-op.
pub fn clean(work_dir: &Path, naming: &Naming) -> std::io::Result<CleanReport> {
  let entries = match std::fs::read_dir(work_dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      debug!(path = %work_dir.display(), "work directory missing, nothing to clean");
      return Ok(CleanReport::default());
    }
    Err(e) => return Err(e),
  };

  let mut removed = Vec::new();
  for entry in entries {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
      continue;
    };
    if naming.is_rendered_file_name(name) {
      let path = entry.path();
      std::fs::remove_file(&path)?;
      debug!(path = %path.display(), "removed rendered build file");
      removed.push(path);
    }
  }

  removed.sort();
  if removed.is_empty() {
    warn!(path = %work_dir.display(), "no rendered build files to clean");
  } else {
    info!(count = removed.len(), "removed rendered build files");
  }

  Ok(CleanReport { removed })
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::matrix::Distribution;

  const UBUNTU_TEMPLATE: &str = "FROM nvidia/cuda:LIBRARY_VERSION-devel-ubuntuDISTRIBUTION_VERSION\n\
                                 RUN rustup toolchain add nightly-CHANNEL_VERSION\n";
  const CENTOS_TEMPLATE: &str = "FROM nvidia/cuda:LIBRARY_VERSION-devel-centosDISTRIBUTION_VERSION\n\
                                 RUN rustup toolchain add nightly-CHANNEL_VERSION\n";

  /// Engine fake recording calls; builds of listed identities fail.
  #[derive(Default)]
  struct FakeEngine {
    builds: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
    failing: HashSet<String>,
  }

  impl FakeEngine {
    fn failing(identities: &[&str]) -> Self {
      Self {
        failing: identities.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
      }
    }
  }

  impl ContainerEngine for FakeEngine {
    async fn build(&self, dockerfile: &Path, image: &ImageReference, _context: &Path) -> Result<(), ExecError> {
      assert!(dockerfile.exists(), "build file must be rendered before build");
      self.builds.lock().unwrap().push(image.name.clone());
      if self.failing.contains(&image.name) {
        return Err(ExecError::Failed {
          command: format!("docker build -t {image}"),
          code: Some(1),
        });
      }
      Ok(())
    }

    async fn push(&self, image: &ImageReference) -> Result<(), ExecError> {
      self.pushes.lock().unwrap().push(image.to_string());
      Ok(())
    }
  }

  fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
  }

  fn accel_axes() -> AxisSet {
    AxisSet::new(
      Distribution::defaults(),
      strings(&["10.0", "10.1", "10.2"]),
      strings(&["2020-01-02", "2020-05-01"]),
    )
    .unwrap()
  }

  /// Temp dir with both templates, used as template and work dir.
  fn workspace() -> (TempDir, BuildOptions) {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("ubuntu.Dockerfile"), UBUNTU_TEMPLATE).unwrap();
    std::fs::write(temp.path().join("centos.Dockerfile"), CENTOS_TEMPLATE).unwrap();
    let options = BuildOptions {
      template_dir: temp.path().to_path_buf(),
      work_dir: temp.path().to_path_buf(),
      context_dir: temp.path().to_path_buf(),
      ..Default::default()
    };
    (temp, options)
  }

  fn file_names(dir: &Path) -> HashSet<String> {
    std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect()
  }

  #[tokio::test]
  async fn builds_and_pushes_every_target() {
    let (_temp, options) = workspace();
    let engine = Arc::new(FakeEngine::default());

    let report = build_all(&accel_axes(), "registry.example.com/accel", "master", &options, engine.clone())
      .await
      .unwrap();

    assert_eq!(report.outcomes.len(), 18);
    assert!(report.is_success());
    assert_eq!(engine.builds.lock().unwrap().len(), 18);

    let pushes = engine.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 18);
    assert!(pushes.contains(&"registry.example.com/accel/ubuntu18.04-cuda10.1-nightly2020-05-01:master".to_string()));
  }

  #[tokio::test]
  async fn rendered_file_contains_target_values() {
    let (temp, options) = workspace();
    let engine = Arc::new(FakeEngine::default());

    build_all(&accel_axes(), "r", "t", &options, engine).await.unwrap();

    let rendered = std::fs::read_to_string(temp.path().join("centos6-cuda10.2-nightly2020-01-02.Dockerfile")).unwrap();
    assert_eq!(
      rendered,
      "FROM nvidia/cuda:10.2-devel-centos6\nRUN rustup toolchain add nightly-2020-01-02\n"
    );
  }

  #[tokio::test]
  async fn failing_target_does_not_stop_others() {
    let (_temp, options) = workspace();
    let engine = Arc::new(FakeEngine::failing(&[
      "ubuntu18.04-cuda10.0-nightly2020-01-02",
      "centos7-cuda10.2-nightly2020-05-01",
    ]));

    let err = build_all(&accel_axes(), "r", "t", &options, engine.clone())
      .await
      .unwrap_err();

    let BuildError::TargetsFailed { report } = &err else {
      panic!("expected TargetsFailed, got {err:?}");
    };
    assert_eq!(report.outcomes.len(), 18);
    assert_eq!(
      report.failed_identities(),
      vec!["ubuntu18.04-cuda10.0-nightly2020-01-02", "centos7-cuda10.2-nightly2020-05-01"]
    );
    assert_eq!(engine.builds.lock().unwrap().len(), 18);
    assert_eq!(engine.pushes.lock().unwrap().len(), 16);
    assert!(err.to_string().starts_with("2 of 18 target(s) failed"));
  }

  #[tokio::test]
  async fn parallel_run_reports_in_matrix_order() {
    let (_temp, mut options) = workspace();
    options.jobs = 8;
    let engine = Arc::new(FakeEngine::default());
    let axes = accel_axes();

    let report = build_all(&axes, "r", "t", &options, engine).await.unwrap();

    let expected: Vec<String> = axes.targets().map(|t| t.identity(&options.naming)).collect();
    let actual: Vec<String> = report.outcomes.iter().map(|o| o.identity.clone()).collect();
    assert_eq!(actual, expected);
  }

  #[tokio::test]
  async fn missing_template_fails_only_that_family() {
    let (temp, options) = workspace();
    std::fs::remove_file(temp.path().join("centos.Dockerfile")).unwrap();
    let engine = Arc::new(FakeEngine::default());

    let err = build_all(&accel_axes(), "r", "t", &options, engine.clone())
      .await
      .unwrap_err();

    let BuildError::TargetsFailed { report } = err else {
      panic!("expected TargetsFailed");
    };
    assert_eq!(report.succeeded().count(), 6);
    assert_eq!(report.failed().count(), 12);
    assert!(
      report
        .failed()
        .all(|o| matches!(o.error, Some(TargetError::Template { .. })))
    );
    assert_eq!(engine.builds.lock().unwrap().len(), 6);
  }

  #[tokio::test]
  async fn local_mode_skips_push() {
    let (_temp, mut options) = workspace();
    options.mode = BuildMode::Local;
    let engine = Arc::new(FakeEngine::default());

    build_all(&accel_axes(), "r", "t", &options, engine.clone()).await.unwrap();

    assert_eq!(engine.builds.lock().unwrap().len(), 18);
    assert!(engine.pushes.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn render_only_never_invokes_engine() {
    let (temp, mut options) = workspace();
    options.mode = BuildMode::RenderOnly;
    let engine = Arc::new(FakeEngine::default());

    build_all(&accel_axes(), "r", "t", &options, engine.clone()).await.unwrap();

    assert!(engine.builds.lock().unwrap().is_empty());
    assert_eq!(file_names(temp.path()).len(), 20);
  }

  #[tokio::test]
  async fn only_filter_selects_named_targets() {
    let (_temp, mut options) = workspace();
    options.only = strings(&["centos7-cuda10.1-nightly2020-05-01"]);
    let engine = Arc::new(FakeEngine::default());

    let report = build_all(&accel_axes(), "r", "t", &options, engine.clone()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(
      *engine.builds.lock().unwrap(),
      vec!["centos7-cuda10.1-nightly2020-05-01".to_string()]
    );
  }

  #[test]
  fn only_filter_rejects_unknown_identities() {
    let options = BuildOptions {
      only: strings(&["centos8-cuda11.0-nightly2021-01-01", "centos7-cuda10.1-nightly2020-05-01"]),
      ..Default::default()
    };

    let err = plan(&accel_axes(), "r", "t", &options).unwrap_err();

    assert!(
      matches!(err, BuildError::UnknownTargets { ref unknown } if unknown == &["centos8-cuda11.0-nightly2021-01-01"])
    );
  }

  #[test]
  fn plan_has_one_target_per_identity() {
    let axes = AxisSet::new(
      Distribution::defaults(),
      strings(&["10.1", "10.1"]),
      strings(&["2020-05-01"]),
    )
    .unwrap();

    let planned = plan(&axes, "r", "t", &BuildOptions::default()).unwrap();

    let unique: HashSet<&str> = planned.iter().map(|p| p.identity.as_str()).collect();
    assert_eq!(planned.len(), 3);
    assert_eq!(unique.len(), planned.len());
  }

  #[test]
  fn colliding_identities_are_rejected() {
    let axes = AxisSet::new(
      vec![Distribution::new("ubuntu", "18.04"), Distribution::new("ubuntu1", "8.04")],
      strings(&["10.1"]),
      strings(&["2020-05-01"]),
    )
    .unwrap();

    let err = plan(&axes, "r", "t", &BuildOptions::default()).unwrap_err();

    assert!(
      matches!(err, BuildError::DuplicateIdentity { ref identity } if identity == "ubuntu18.04-cuda10.1-nightly2020-05-01")
    );
  }

  #[tokio::test]
  async fn unusable_work_dir_fails_every_target() {
    let (temp, mut options) = workspace();
    std::fs::write(temp.path().join("not-a-dir"), "").unwrap();
    options.work_dir = temp.path().join("not-a-dir").join("out");
    let engine = Arc::new(FakeEngine::default());

    let err = build_all(&accel_axes(), "r", "t", &options, engine.clone())
      .await
      .unwrap_err();

    let BuildError::TargetsFailed { report } = err else {
      panic!("expected TargetsFailed");
    };
    assert_eq!(report.failed().count(), 18);
    assert!(
      report
        .failed()
        .all(|o| matches!(o.error, Some(TargetError::Write { .. })))
    );
    assert!(engine.builds.lock().unwrap().is_empty());
  }

  #[test]
  fn plan_derives_paths_and_images() {
    let options = BuildOptions {
      work_dir: PathBuf::from("/work"),
      ..Default::default()
    };

    let planned = plan(&accel_axes(), "registry.gitlab.com/termoshtt/accel", "manual", &options).unwrap();

    assert_eq!(planned.len(), 18);
    let first = &planned[0];
    assert_eq!(first.identity, "ubuntu18.04-cuda10.0-nightly2020-01-02");
    assert_eq!(
      first.dockerfile,
      PathBuf::from("/work/ubuntu18.04-cuda10.0-nightly2020-01-02.Dockerfile")
    );
    assert_eq!(
      first.image.to_string(),
      "registry.gitlab.com/termoshtt/accel/ubuntu18.04-cuda10.0-nightly2020-01-02:manual"
    );
  }

  #[tokio::test]
  async fn render_target_is_idempotent() {
    let (_temp, options) = workspace();
    let planned = plan(&accel_axes(), "r", "t", &options).unwrap();

    let path = render_target(&planned[3], &options).await.unwrap();
    let first = std::fs::read(&path).unwrap();
    render_target(&planned[3], &options).await.unwrap();
    let second = std::fs::read(&path).unwrap();

    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn clean_removes_exactly_rendered_files() {
    let (temp, options) = workspace();
    std::fs::write(temp.path().join("Makefile"), "all:\n").unwrap();
    std::fs::write(temp.path().join("notes.txt"), "keep").unwrap();
    let before = file_names(temp.path());

    build_all(&accel_axes(), "r", "t", &options, Arc::new(FakeEngine::default()))
      .await
      .unwrap();
    assert_eq!(file_names(temp.path()).len(), before.len() + 18);

    let cleaned = clean(temp.path(), &options.naming).unwrap();

    assert_eq!(cleaned.removed.len(), 18);
    assert_eq!(file_names(temp.path()), before);
  }

  #[test]
  #[traced_test]
  fn clean_without_rendered_files_is_noop() {
    let (temp, options) = workspace();

    let cleaned = clean(temp.path(), &options.naming).unwrap();

    assert!(cleaned.removed.is_empty());
    assert_eq!(file_names(temp.path()).len(), 2);
    assert!(logs_contain("no rendered build files to clean"));
  }

  #[test]
  fn clean_missing_directory_is_noop() {
    let temp = TempDir::new().unwrap();
    let cleaned = clean(&temp.path().join("absent"), &Naming::default()).unwrap();
    assert!(cleaned.removed.is_empty());
  }
}
