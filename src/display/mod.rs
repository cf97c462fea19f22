//! Rich terminal display utilities for CLI output.
//!
//! Provides styled tables, progress spinners and themed messages.

pub mod progress;
pub mod tables;
pub mod theme;

pub use progress::{create_build_spinner, create_spinner, phase_reporter, with_spinner};
pub use tables::{TableBuilder, create_info_table, create_results_table};
pub use theme::{THEME, Theme};
