//! Progress indicators for long-running commands.
//!
//! Spinners and bars come from `indicatif`. They are hidden when stdout is
//! not a terminal, under `--quiet`, and always under `--json`.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// How progress is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Animated spinners and bars on a terminal.
    Interactive,
    /// Final results only.
    Quiet,
    /// Nothing but the machine-readable output.
    Silent,
}

impl ProgressMode {
    pub fn detect(quiet: bool, json: bool) -> Self {
        if json {
            Self::Silent
        } else if quiet || !atty::is(atty::Stream::Stdout) {
            Self::Quiet
        } else {
            Self::Interactive
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive)
    }

    /// Whether human-readable summaries are printed at all.
    pub fn prints_summary(&self) -> bool {
        !matches!(self, Self::Silent)
    }
}

/// Braille spinner frames.
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

const BAR_CHARS: &str = "█░";

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars(SPINNER_CHARS)
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A spinner or a bar.
pub struct Progress {
    bar: ProgressBar,
    mode: ProgressMode,
}

impl Progress {
    /// Indeterminate spinner.
    pub fn spinner(message: &str, mode: ProgressMode) -> Self {
        let bar = if mode.is_interactive() {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style("{spinner:.cyan} {msg} ({elapsed})"));
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar, mode }
    }

    /// Determinate bar over `total` units.
    pub fn bar(total: u64, message: &str, mode: ProgressMode) -> Self {
        let bar = if mode.is_interactive() {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("[{bar:20.cyan/dim}] {percent:>3}% ({pos}/{len}) {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars(BAR_CHARS);
            pb.set_style(style);
            pb.set_message(message.to_string());
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar, mode }
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    pub fn finish_clear(&self) {
        self.bar.finish_and_clear();
    }

    /// Clear the line and print `message` in its place.
    pub fn finish_with_message(&self, message: &str) {
        self.bar.finish_and_clear();
        if self.mode.prints_summary() && !message.is_empty() {
            println!("{}", message);
        }
    }
}

/// Step-tree progress for multi-phase commands.
///
/// ```text
/// ├─ Collecting sources done (12ms)
/// ├─ Parsing done (0.2s)
/// └─ Committing done (1.4s)
/// ```
pub struct StepTree {
    mode: ProgressMode,
    current: Option<(String, Instant, Option<ProgressBar>)>,
}

impl StepTree {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            current: None,
        }
    }

    /// Start a step, finishing the running one.
    pub fn step(&mut self, name: &str) {
        self.finish_current(false);
        let spinner = self.mode.is_interactive().then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(spinner_style("├─ {spinner:.cyan} {msg}"));
            bar.set_message(format!("{}...", name));
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        self.current = Some((name.to_string(), Instant::now(), spinner));
    }

    pub fn finish_last_step(&mut self) {
        self.finish_current(true);
    }

    fn finish_current(&mut self, is_last: bool) {
        let Some((name, started, spinner)) = self.current.take() else {
            return;
        };
        if let Some(bar) = spinner {
            bar.finish_and_clear();
        }
        if self.mode.is_interactive() {
            let prefix = if is_last { "└─" } else { "├─" };
            println!("{} {} done ({})", prefix, name, format_duration(started.elapsed()));
        }
    }
}

impl Drop for StepTree {
    fn drop(&mut self) {
        if let Some((_, _, Some(bar))) = self.current.take() {
            bar.finish_and_clear();
        }
    }
}

/// "12ms" below a tenth of a second, "2.8s" above.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 0.1 {
        format!("{:.0}ms", secs * 1000.0)
    } else {
        format!("{:.1}s", secs)
    }
}
