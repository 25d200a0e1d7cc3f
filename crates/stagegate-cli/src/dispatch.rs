use std::ffi::OsString;
use std::io;
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use stagegate_batch::{
    load_extensions, now_unix_ms, BatchError, BatchOrchestrator, StagegateConfig, StepOutcome,
};
use tracing::debug;

use crate::completion::write_completions_script;
use crate::render::{format_wait, render_batch_status_lines, TerminalRenderer};
use crate::{Cli, Commands, GlobalArgs};

/// Configuration and orchestrator for commands that touch project state.
struct Session {
    config: StagegateConfig,
    orchestrator: BatchOrchestrator,
}

impl Session {
    fn open(globals: &GlobalArgs) -> Result<Self> {
        let config =
            StagegateConfig::discover(globals.config.as_deref(), globals.project_root.as_deref())?;
        debug!(project_root = %config.project_root.display(), "loaded configuration");
        let orchestrator = BatchOrchestrator::from_config(&config)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }
}

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let Cli { globals, command } = cli;
    let renderer = TerminalRenderer::current();
    let slot = globals.slot.as_str();

    match command {
        Commands::Completion { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
        }
        Commands::Install { query } => {
            let session = Session::open(&globals)?;
            let spec = session.orchestrator.begin_install(slot, &query)?;
            renderer.print_status("ok", &format!("queued install of {spec} on slot '{slot}'"));
            renderer.print_lines(&["run `stagegate run` to stage and apply it".to_string()]);
        }
        Commands::Uninstall { names } => {
            let session = Session::open(&globals)?;
            session.orchestrator.begin_uninstall(slot, &names)?;
            renderer.print_status(
                "ok",
                &format!("queued uninstall of {} on slot '{slot}'", names.join(", ")),
            );
            renderer.print_lines(&["run `stagegate run` to stage and apply it".to_string()]);
        }
        Commands::Step => {
            let session = Session::open(&globals)?;
            let outcome = session
                .orchestrator
                .run_next_step(slot)
                .map_err(|err| report_step_failure(renderer, err))?;
            renderer.print_status(outcome_status(&outcome), &describe_outcome(&outcome));
        }
        Commands::Run => {
            let session = Session::open(&globals)?;
            run_batch(&session.orchestrator, &globals, renderer)?;
        }
        Commands::Cancel => match Session::open(&globals)?.orchestrator.cancel(slot)? {
            Some(id) => renderer.print_status("ok", &format!("destroyed stage {id}")),
            None => renderer.print_status("ok", &format!("nothing staged on slot '{slot}'")),
        },
        Commands::Status => {
            let session = Session::open(&globals)?;
            let status = session.orchestrator.status(slot)?;
            renderer.print_section("batch");
            renderer.print_lines(&render_batch_status_lines(slot, &status));

            let report = session.orchestrator.preview_status(slot)?;
            if !report.is_empty() {
                renderer.print_section("validation");
                renderer.print_report(&report);
            }
        }
        Commands::Available => {
            if Session::open(&globals)?.orchestrator.is_available(slot)? {
                renderer.print_status("ok", &format!("slot '{slot}' is available"));
            } else {
                renderer.print_status("warn", &format!("slot '{slot}' is busy"));
            }
        }
        Commands::Uninstallable => {
            let session = Session::open(&globals)?;
            let extensions = load_extensions(&session.config.extensions_path())?;
            let candidates = session.orchestrator.uninstallable(&extensions)?;
            if candidates.is_empty() {
                renderer.print_status("ok", "no packages can be uninstalled");
            }
            for candidate in candidates {
                println!("{candidate}");
            }
        }
    }

    Ok(())
}

/// Drives the batch to completion, running each step in a fresh process so
/// no step shares memory with the one before it.
fn run_batch(
    orchestrator: &BatchOrchestrator,
    globals: &GlobalArgs,
    renderer: TerminalRenderer,
) -> Result<()> {
    let slot = globals.slot.as_str();
    let exe = std::env::current_exe().context("failed to locate the stagegate executable")?;
    let args = step_command_args(globals);

    loop {
        let status = orchestrator.status(slot)?;
        let Some(cursor) = status.cursor else {
            renderer.print_status("ok", &format!("batch on slot '{slot}' finished"));
            return Ok(());
        };

        if let Some(remaining) = cursor.remaining_wait_ms(now_unix_ms()) {
            renderer.wait_for_finalize(Duration::from_millis(remaining));
            continue;
        }

        debug!(slot, step = %cursor.next_step, "spawning step process");
        let exit = Command::new(&exe)
            .args(&args)
            .status()
            .with_context(|| format!("failed to run step '{}'", cursor.next_step))?;
        if !exit.success() {
            bail!(
                "step '{}' failed for slot '{slot}'; run `stagegate step` to retry or `stagegate cancel` to abandon",
                cursor.next_step
            );
        }
    }
}

pub(crate) fn step_command_args(globals: &GlobalArgs) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(config) = &globals.config {
        args.push("--config".into());
        args.push(config.into());
    }
    if let Some(project_root) = &globals.project_root {
        args.push("--project-root".into());
        args.push(project_root.into());
    }
    args.push("--slot".into());
    args.push(globals.slot.clone().into());
    if globals.verbose {
        args.push("--verbose".into());
    }
    args.push("step".into());
    args
}

pub(crate) fn describe_outcome(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Pending { completed, next } => format!("{completed} done, next: {next}"),
        StepOutcome::Waiting { remaining } => {
            format!("finalize is not due yet; wait {}", format_wait(*remaining))
        }
        StepOutcome::Done => "batch finished".to_string(),
    }
}

fn outcome_status(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Waiting { .. } => "warn",
        StepOutcome::Pending { .. } | StepOutcome::Done => "ok",
    }
}

fn report_step_failure(renderer: TerminalRenderer, err: BatchError) -> anyhow::Error {
    let report = err.stage_error().and_then(|stage| stage.validation_report());
    if let Some(report) = report {
        renderer.print_section("validation");
        renderer.print_report(report);
    }
    err.into()
}
