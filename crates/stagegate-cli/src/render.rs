use std::io::IsTerminal;
use std::thread;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use stagegate_batch::BatchStatus;
use stagegate_validation::{Severity, ValidationReport, ValidationResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UiMode {
    Plain,
    Interactive,
}

/// Piped stdout always gets plain text, whatever stderr is attached to.
pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
    mode: UiMode,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self {
            style,
            mode: ui_mode_from_style(style),
        }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.mode, title) {
            println!();
            let rendered = match self.style {
                OutputStyle::Plain => line,
                OutputStyle::Rich => colorize(section_style(), &line),
            };
            println!("{rendered}");
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn print_report(self, report: &ValidationReport) {
        self.print_lines(&render_report_lines(self.style, report));
    }

    /// Blocks for `remaining`, showing a spinner on a terminal.
    pub(crate) fn wait_for_finalize(self, remaining: Duration) {
        let spinner = (self.style == OutputStyle::Rich).then(|| {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
                spinner.set_style(style.tick_chars("|/-\\ "));
            }
            spinner.set_message(format!(
                "waiting {} before finalizing",
                format_wait(remaining)
            ));
            spinner.enable_steady_tick(Duration::from_millis(80));
            spinner
        });

        thread::sleep(remaining);

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = status_badge(status);
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

fn status_badge(status: &str) -> (&'static str, Style) {
    match status {
        "ok" => ("[OK]", badge_style(AnsiColor::BrightGreen)),
        "warn" => ("[WARN]", badge_style(AnsiColor::BrightYellow)),
        "error" => ("[ERR]", badge_style(AnsiColor::BrightRed)),
        "step" => ("[..]", badge_style(AnsiColor::BrightCyan)),
        _ => ("[--]", Style::new()),
    }
}

/// Errors first, then warnings; each result's messages sit under its
/// heading when it has one.
pub(crate) fn render_report_lines(style: OutputStyle, report: &ValidationReport) -> Vec<String> {
    let mut lines = Vec::new();
    for result in report
        .errors()
        .into_iter()
        .chain(report.warnings())
    {
        push_result_lines(style, result, &mut lines);
    }
    lines
}

fn push_result_lines(style: OutputStyle, result: &ValidationResult, lines: &mut Vec<String>) {
    let status = match result.severity {
        Severity::Error => "error",
        Severity::Warning => "warn",
    };

    match &result.heading {
        Some(heading) => {
            lines.push(render_status_line(style, status, heading));
            for message in &result.messages {
                lines.push(format!("  - {message}"));
            }
        }
        None => {
            for message in &result.messages {
                lines.push(render_status_line(style, status, message));
            }
        }
    }
}

pub(crate) fn render_batch_status_lines(slot: &str, status: &BatchStatus) -> Vec<String> {
    let mut lines = vec![format!("slot: {slot}")];

    match &status.cursor {
        Some(cursor) => {
            lines.push(format!("workflow: {}", cursor.workflow.as_str()));
            lines.push(format!("packages: {}", cursor.packages.join(", ")));
            lines.push(format!("next step: {}", cursor.next_step));
            if let Some(error) = &cursor.last_error {
                lines.push(format!("last error: {error}"));
            }
        }
        None => lines.push("batch: none".to_string()),
    }

    match &status.stage {
        Some((handle, state)) => lines.push(format!("stage: {} ({state})", handle.id)),
        None => lines.push("stage: none".to_string()),
    }
    lines
}

pub(crate) fn format_wait(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let millis = remaining.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn badge_style(color: AnsiColor) -> Style {
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn ui_mode_from_style(style: OutputStyle) -> UiMode {
    match style {
        OutputStyle::Plain => UiMode::Plain,
        OutputStyle::Rich => UiMode::Interactive,
    }
}

fn render_section_header(mode: UiMode, title: &str) -> Option<String> {
    match mode {
        UiMode::Plain => None,
        UiMode::Interactive => Some(format!("== {title} ==")),
    }
}
