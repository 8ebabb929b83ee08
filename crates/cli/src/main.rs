mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use imgmatrix_lib::build::BuildMode;
use imgmatrix_lib::config::{MatrixOverrides, ProvisionOverrides};

use crate::cmd::{MatrixAction, cmd_build_matrix, cmd_provision};
use crate::output::OutputFormat;

/// imgmatrix - toolchain provisioning and container image build matrix
#[derive(Parser)]
#[command(name = "imgmatrix")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Config file (default: ./imgmatrix.toml when present)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install a toolchain channel with its component, target and linker tool
  Provision {
    /// Channel to install, e.g. nightly-2020-05-01
    channel: String,

    /// Component added to the channel
    #[arg(long)]
    component: Option<String>,

    /// Compilation target added to the channel
    #[arg(long)]
    target: Option<String>,

    /// Tool installed globally with a forced overwrite
    #[arg(long)]
    tool: Option<String>,

    /// Print the commands without running them
    #[arg(long)]
    dry_run: bool,
  },

  /// Render, build and push every image of the build matrix
  BuildMatrix {
    #[command(subcommand)]
    action: Option<MatrixCommand>,

    #[command(flatten)]
    args: MatrixArgs,
  },
}

#[derive(Subcommand)]
enum MatrixCommand {
  /// Remove rendered build files from the work directory
  Clean,
  /// List the targets the matrix expands to
  List,
}

#[derive(Args)]
struct MatrixArgs {
  /// Registry root images are pushed under
  #[arg(long, global = true)]
  registry: Option<String>,

  /// Tag applied to every image (default: $CI_COMMIT_REF_SLUG or "manual")
  #[arg(long, global = true)]
  tag: Option<String>,

  /// Library version axis value (repeatable)
  #[arg(long = "library-version", global = true)]
  library_versions: Vec<String>,

  /// Channel version axis value (repeatable)
  #[arg(long = "channel-version", global = true)]
  channel_versions: Vec<String>,

  /// Directory holding <family>.Dockerfile templates
  #[arg(long, global = true)]
  template_dir: Option<PathBuf>,

  /// Directory rendered build files are written to
  #[arg(long, global = true)]
  work_dir: Option<PathBuf>,

  /// Container engine executable (docker, podman, ...)
  #[arg(long, global = true)]
  engine: Option<String>,

  /// Number of targets processed in parallel
  #[arg(short, long, global = true)]
  jobs: Option<usize>,

  /// Only process the target with this identity (repeatable)
  #[arg(long, global = true)]
  only: Vec<String>,

  /// Build images without pushing them
  #[arg(long, global = true, conflicts_with = "render_only")]
  no_push: bool,

  /// Render build files without invoking the container engine
  #[arg(long, global = true)]
  render_only: bool,
}

impl MatrixArgs {
  fn into_overrides(self) -> MatrixOverrides {
    let mode = if self.render_only {
      BuildMode::RenderOnly
    } else if self.no_push {
      BuildMode::Local
    } else {
      BuildMode::Publish
    };

    MatrixOverrides {
      registry: self.registry,
      tag: self.tag,
      engine: self.engine,
      jobs: self.jobs,
      template_dir: self.template_dir,
      work_dir: self.work_dir,
      library_versions: self.library_versions,
      channel_versions: self.channel_versions,
      only: self.only,
      mode,
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "imgmatrix=debug,imgmatrix_lib=debug" } else { "warn" }));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();

  match cli.command {
    Commands::Provision {
      channel,
      component,
      target,
      tool,
      dry_run,
    } => {
      let overrides = ProvisionOverrides {
        component,
        target,
        tool,
      };
      cmd_provision(&channel, overrides, config, dry_run, cli.output)
    }
    Commands::BuildMatrix { action, args } => {
      let action = match action {
        None => MatrixAction::Build,
        Some(MatrixCommand::Clean) => MatrixAction::Clean,
        Some(MatrixCommand::List) => MatrixAction::List,
      };
      cmd_build_matrix(action, args.into_overrides(), config, cli.output)
    }
  }
}
