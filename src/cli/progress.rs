//! CLI-specific progress handling for butterfly-wayfinder
//!
//! Sync has no byte count to report, so the CLI shows a spinner while the
//! gate talks to the network.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Creates a spinner for CLI display
pub fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Progress manager for sync operations
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(message: &str) -> Self {
        let pb = create_spinner();
        pb.set_message(message.to_string());

        Self { pb }
    }

    /// Stop the spinner and leave `message` on screen
    pub fn finish(&self, message: &str) {
        self.pb.finish_with_message(message.to_string());
    }
}
