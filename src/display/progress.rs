//! Progress indicators for long-running operations.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::indexing::BuildPhase;

/// Create a spinner for indeterminate progress.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Spinner that follows build phases; pass [`phase_reporter`] to the build.
pub fn create_build_spinner() -> ProgressBar {
    create_spinner("Starting build")
}

/// Callback updating `spinner` with each build phase.
pub fn phase_reporter(spinner: ProgressBar) -> impl Fn(BuildPhase) + Send + Sync + 'static {
    move |phase| {
        if let BuildPhase::Embedding { done, total } = phase {
            spinner.set_length(total as u64);
            spinner.set_position(done as u64);
        }
        spinner.set_message(phase.to_string());
    }
}

/// Helper to display a temporary spinner during an operation.
pub fn with_spinner<F, T>(message: &str, operation: F) -> T
where
    F: FnOnce() -> T,
{
    let spinner = create_spinner(message);
    let result = operation();
    spinner.finish_and_clear();
    result
}
