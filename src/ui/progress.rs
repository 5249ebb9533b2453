//! Spinners and progress bars with a plain fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a single long-running step
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => eprintln!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => eprintln!("{} {}", style("[FAIL]").red(), message),
        }
    }

    /// Remove the spinner without a closing line
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Outcome of one key in a batch fetch, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMark {
    Local,
    Mirrored,
    Missing,
    Failed,
}

/// Progress over a batch of keys being mirrored
///
/// Draws an indicatif bar on a terminal. Otherwise prints one line per
/// finished key.
pub struct FetchProgress {
    bar: Option<ProgressBar>,
}

impl FetchProgress {
    pub fn new(ctx: &UiContext, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total);
            if let Ok(template) = ProgressStyle::default_bar().template(
                "  {spinner:.blue} Fetching  {bar:24.blue/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            ) {
                bar.set_style(
                    template
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar }
    }

    /// Record one finished key
    pub fn on_done(&self, key: &str, mark: FetchMark) {
        match self.bar {
            Some(ref bar) => {
                bar.inc(1);
                bar.set_message(key.to_string());
                if matches!(mark, FetchMark::Missing | FetchMark::Failed) {
                    bar.println(format!("  {} {}", tag(mark), key));
                }
            }
            None => eprintln!("  {} {}", tag(mark), key),
        }
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn tag(mark: FetchMark) -> console::StyledObject<&'static str> {
    match mark {
        FetchMark::Local => style("[LOCAL]").dim(),
        FetchMark::Mirrored => style("[OK]").green(),
        FetchMark::Missing => style("[MISSING]").yellow(),
        FetchMark::Failed => style("[FAIL]").red(),
    }
}
