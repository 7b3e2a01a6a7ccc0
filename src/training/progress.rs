//! Per-epoch progress display
//!
//! Shows a bar when the number of batches is known and a spinner when it is
//! not. Non-verbose runs get a hidden bar so the training loops never branch
//! on whether progress is displayed.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress reporter for one epoch of training
pub struct EpochProgress {
    bar: ProgressBar,
}

impl EpochProgress {
    /// Create a reporter for epoch `epoch` (1-based) of `epochs`
    pub fn new(epoch: usize, epochs: usize, total_batches: Option<usize>, verbose: bool) -> Self {
        let bar = match (verbose, total_batches) {
            (false, _) => ProgressBar::hidden(),
            (true, Some(total)) => {
                let bar = ProgressBar::new(total as u64);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                bar
            }
            (true, None) => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} {msg} {pos} batches [{elapsed_precise}]")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_message(format!("Epoch {}/{}", epoch, epochs));
        Self { bar }
    }

    /// Advance by one batch, showing the latest losses
    pub fn advance(&self, losses: &[(&str, f64)]) {
        if !losses.is_empty() {
            let summary = losses
                .iter()
                .map(|(name, value)| format!("{}={:.4}", name, value))
                .collect::<Vec<_>>()
                .join(" ");
            self.bar.set_message(summary);
        }
        self.bar.inc(1);
    }

    /// Finish and clear the display
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Number of batches seen so far
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}
