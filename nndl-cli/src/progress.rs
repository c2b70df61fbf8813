use indicatif::{ProgressBar, ProgressStyle};
use nndl_engine::transfer::{ProgressObserver, ProgressUpdate, format_bytes};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}, {eta}) {msg}";

/// Terminal progress bar fed by the transfer engine.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressObserver for BarProgress {
    fn on_start(&self, total_length: u64, resumed_from: u64) {
        self.bar.set_length(total_length);
        self.bar.set_position(resumed_from);
        if resumed_from > 0 {
            self.bar
                .println(format!("Resuming from {}", format_bytes(resumed_from)));
        }
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        self.bar.set_position(update.bytes_written);
    }

    fn on_finish(&self, update: &ProgressUpdate) {
        self.bar.set_position(update.bytes_written);
        self.bar
            .finish_with_message(format!("{} at {}", format_bytes(update.bytes_written), update.speed()));
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn update(bytes_written: u64) -> ProgressUpdate {
        ProgressUpdate {
            bytes_written,
            total_length: 2048,
            transferred: bytes_written,
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn template_shows_the_finish_message() {
        assert!(BAR_TEMPLATE.contains("{msg}"));
    }

    #[test]
    fn finish_leaves_a_summary_message() {
        let progress = BarProgress::new(true);
        progress.on_start(2048, 0);
        progress.on_progress(&update(1024));
        progress.on_finish(&update(2048));

        assert!(progress.bar.is_finished());
        assert_eq!(progress.bar.position(), 2048);
        assert!(progress.bar.message().starts_with(&format!("{} at ", format_bytes(2048))));
    }
}
