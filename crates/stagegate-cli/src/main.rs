use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod completion;
mod dispatch;
mod render;

use completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "stagegate")]
#[command(about = "Staged, validated package changes for a managed project", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Options forwarded unchanged to every `step` child of `run`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct GlobalArgs {
    /// Path to stagegate.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    /// Named stage slot; only one stage may be live per slot.
    #[arg(long, global = true, default_value = "default")]
    slot: String,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue installing the latest release of a project.
    Install { query: String },
    /// Queue removing installed packages.
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Run the next queued step.
    Step,
    /// Run queued steps until the batch finishes, one process per step.
    Run,
    /// Abandon the batch and destroy its stage.
    Cancel,
    Status,
    Available,
    /// List installed packages that no enabled extension needs.
    Uninstallable,
    Completion {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in [
        "stagegate_cli",
        "stagegate_batch",
        "stagegate_stage",
        "stagegate_validation",
    ] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.globals.verbose)?;
    dispatch::run_cli(cli)
}

#[cfg(test)]
mod tests;
