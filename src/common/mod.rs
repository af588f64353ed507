//! Common utilities shared by the library, the CLI, and the scenario runner

pub mod config;
pub mod error;
pub mod logging;
pub mod names;
pub mod paths;

pub use error::{Error, Result};

/// Shorten command output for log lines and error messages
pub fn truncate_output(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
