use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use stagegate_batch::{BatchCursor, BatchStatus, BatchStep, StepOutcome, Workflow};
use stagegate_stage::{StageHandle, StageState};
use stagegate_validation::{ValidationReport, ValidationResult};

use super::*;
use crate::completion::write_completions_script;
use crate::dispatch::{describe_outcome, run_cli, step_command_args};
use crate::render::{
    format_wait, render_batch_status_lines, render_report_lines, render_status_line,
    resolve_output_style, OutputStyle,
};

#[test]
fn cli_parses_install_with_global_options_after_the_subcommand() {
    let cli = Cli::try_parse_from([
        "stagegate",
        "install",
        "token",
        "--slot",
        "updates",
        "--project-root",
        "/srv/site",
    ])
    .expect("command must parse");

    match cli.command {
        Commands::Install { query } => assert_eq!(query, "token"),
        other => panic!("unexpected command: {other:?}"),
    }
    assert_eq!(cli.globals.slot, "updates");
    assert_eq!(cli.globals.project_root, Some(PathBuf::from("/srv/site")));
    assert!(!cli.globals.verbose);
}

#[test]
fn cli_defaults_slot_when_not_given() {
    let cli = Cli::try_parse_from(["stagegate", "status"]).expect("command must parse");
    assert!(matches!(cli.command, Commands::Status));
    assert_eq!(cli.globals.slot, "default");
    assert_eq!(cli.globals.config, None);
}

#[test]
fn cli_uninstall_requires_at_least_one_name() {
    let err = Cli::try_parse_from(["stagegate", "uninstall"])
        .expect_err("uninstall without names must fail");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

    let cli = Cli::try_parse_from(["stagegate", "uninstall", "drupal/token", "drupal/pathauto"])
        .expect("command must parse");
    match cli.command {
        Commands::Uninstall { names } => {
            assert_eq!(names, vec!["drupal/token", "drupal/pathauto"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_rejects_unknown_completion_shell() {
    let err = Cli::try_parse_from(["stagegate", "completion", "tcsh"])
        .expect_err("unknown shell must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);

    let cli = Cli::try_parse_from(["stagegate", "completion", "powershell"])
        .expect("command must parse");
    assert!(matches!(
        cli.command,
        Commands::Completion {
            shell: CliCompletionShell::Powershell
        }
    ));
}

#[test]
fn step_command_args_forward_globals_and_parse_back() {
    let globals = GlobalArgs {
        config: Some(PathBuf::from("/srv/site/stagegate.toml")),
        project_root: None,
        slot: "updates".to_string(),
        verbose: true,
    };

    let args = step_command_args(&globals);
    let expected: Vec<OsString> = [
        "--config",
        "/srv/site/stagegate.toml",
        "--slot",
        "updates",
        "--verbose",
        "step",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    assert_eq!(args, expected);

    let reparsed = Cli::try_parse_from(std::iter::once(OsString::from("stagegate")).chain(args))
        .expect("forwarded args must parse");
    assert!(matches!(reparsed.command, Commands::Step));
    assert_eq!(reparsed.globals, globals);
}

#[test]
fn resolve_output_style_follows_stdout_only() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
}

#[test]
fn render_status_line_is_bare_in_plain_mode() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "slot 'default' is available"),
        "slot 'default' is available"
    );
}

#[test]
fn render_status_line_adds_badges_in_rich_mode() {
    let ok = render_status_line(OutputStyle::Rich, "ok", "done");
    assert!(ok.contains("[OK]"), "unexpected line: {ok}");
    assert!(ok.ends_with(" done"));

    let warn = render_status_line(OutputStyle::Rich, "warn", "busy");
    assert!(warn.contains("[WARN]"), "unexpected line: {warn}");

    let error = render_status_line(OutputStyle::Rich, "error", "blocked");
    assert!(error.contains("[ERR]"), "unexpected line: {error}");
}

#[test]
fn report_lines_put_errors_first_and_indent_headed_messages() {
    let mut report = ValidationReport::new();
    report.push(ValidationResult::warnings(
        vec!["drupal/token updated from 1.9.0 to 1.10.0.".to_string()],
        "The following packages will be updated:",
    ));
    report.push(ValidationResult::error(
        "drupal/devel:5.0.0-beta1 is not a stable release.",
    ));

    let lines = render_report_lines(OutputStyle::Plain, &report);
    assert_eq!(
        lines,
        vec![
            "drupal/devel:5.0.0-beta1 is not a stable release.".to_string(),
            "The following packages will be updated:".to_string(),
            "  - drupal/token updated from 1.9.0 to 1.10.0.".to_string(),
        ]
    );
}

#[test]
fn report_lines_are_empty_for_clean_report() {
    assert!(render_report_lines(OutputStyle::Rich, &ValidationReport::new()).is_empty());
}

#[test]
fn batch_status_lines_describe_cursor_and_stage() {
    let mut cursor = BatchCursor::new(Workflow::Install, vec!["drupal/token:1.10.0".to_string()]);
    cursor.next_step = BatchStep::Apply;
    cursor.last_error = Some("validation failed".to_string());
    let status = BatchStatus {
        cursor: Some(cursor),
        stage: Some((StageHandle::new("stage-0123456789abcdef"), StageState::Populated)),
    };

    let lines = render_batch_status_lines("default", &status);
    assert_eq!(
        lines,
        vec![
            "slot: default".to_string(),
            "workflow: install".to_string(),
            "packages: drupal/token:1.10.0".to_string(),
            "next step: apply".to_string(),
            "last error: validation failed".to_string(),
            "stage: stage-0123456789abcdef (populated)".to_string(),
        ]
    );
}

#[test]
fn batch_status_lines_for_idle_slot() {
    let status = BatchStatus {
        cursor: None,
        stage: None,
    };
    assert_eq!(
        render_batch_status_lines("updates", &status),
        vec![
            "slot: updates".to_string(),
            "batch: none".to_string(),
            "stage: none".to_string(),
        ]
    );
}

#[test]
fn describe_outcome_names_each_step_result() {
    assert_eq!(
        describe_outcome(&StepOutcome::Pending {
            completed: BatchStep::Apply,
            next: BatchStep::Finalize,
        }),
        "apply done, next: finalize"
    );
    assert_eq!(
        describe_outcome(&StepOutcome::Waiting {
            remaining: Duration::from_millis(990),
        }),
        "finalize is not due yet; wait 0.990s"
    );
    assert_eq!(describe_outcome(&StepOutcome::Done), "batch finished");
}

#[test]
fn format_wait_pads_milliseconds() {
    assert_eq!(format_wait(Duration::from_millis(1_005)), "1.005s");
    assert_eq!(format_wait(Duration::ZERO), "0.000s");
}

#[test]
fn completion_script_targets_stagegate_binary() {
    let mut bash = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut bash)
        .expect("must generate bash completions");
    let bash = String::from_utf8(bash).expect("script must be utf-8");
    assert!(bash.contains("_stagegate()"), "unexpected script: {bash}");
    assert!(bash.contains("uninstallable"));

    let mut fish = Vec::new();
    write_completions_script(CliCompletionShell::Fish, &mut fish)
        .expect("must generate fish completions");
    let fish = String::from_utf8(fish).expect("script must be utf-8");
    assert!(fish.contains("complete -c stagegate"));
}

#[test]
fn completion_runs_without_loading_configuration() {
    let cli = Cli::try_parse_from([
        "stagegate",
        "--config",
        "/nonexistent/stagegate/stagegate.toml",
        "completion",
        "zsh",
    ])
    .expect("command must parse");
    run_cli(cli).expect("completion must not read the config file");

    let cli = Cli::try_parse_from([
        "stagegate",
        "--config",
        "/nonexistent/stagegate/stagegate.toml",
        "available",
    ])
    .expect("command must parse");
    let err = run_cli(cli).expect_err("state commands must read the config file");
    assert!(
        format!("{err:#}").contains("failed reading config"),
        "unexpected error: {err:#}"
    );
}
