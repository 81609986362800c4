use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use servup_core::Outcome;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
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

pub(crate) fn render_outcome_line(style: OutputStyle, outcome: Outcome) -> String {
    match outcome {
        Outcome::Success => render_status_line(style, "ok", "command completed successfully"),
        Outcome::Warning => render_status_line(
            style,
            "warn",
            "command completed with warnings, inspect the log output",
        ),
        Outcome::Error => render_status_line(style, "err", "command failed, inspect the log output"),
    }
}

fn status_badge(status: &str) -> (&'static str, Style) {
    match status {
        "ok" => ("[OK]", badge_style(AnsiColor::BrightGreen)),
        "warn" => ("[WARN]", badge_style(AnsiColor::BrightYellow)),
        "err" => ("[ERR]", badge_style(AnsiColor::BrightRed)),
        _ => ("[..]", badge_style(AnsiColor::BrightBlue)),
    }
}

fn badge_style(color: AnsiColor) -> Style {
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// Download progress. Drawn with indicatif on rich terminals, silent
/// otherwise; the log already records the download start.
pub(crate) struct DownloadProgress {
    style: OutputStyle,
    progress_bar: Option<ProgressBar>,
    downloaded: u64,
    started_at: Instant,
}

impl DownloadProgress {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes:>10}/{total_bytes:10} {elapsed_precise}",
            ) {
                progress_bar.set_style(template.progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self {
            style,
            progress_bar,
            downloaded: 0,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn update(&mut self, downloaded: u64, total: Option<u64>) {
        self.downloaded = downloaded;
        let Some(progress_bar) = &self.progress_bar else {
            return;
        };
        if let Some(total) = total {
            progress_bar.set_length(total.max(1));
        }
        progress_bar.set_position(downloaded);
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        println!(
            "{}",
            render_status_line(
                self.style,
                "ok",
                &format!(
                    "downloaded {} in {}",
                    HumanBytes(self.downloaded),
                    format_elapsed(self.started_at.elapsed())
                )
            )
        );
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}
