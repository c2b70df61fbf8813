use std::time::{Duration, Instant};

use humansize::{BINARY, format_size};
use parking_lot::Mutex;
use tracing::info;

/// Below this much elapsed time a throughput figure is meaningless.
const MIN_ELAPSED: Duration = Duration::from_micros(100);

/// Aggregate progress of one transfer.
///
/// Workers report deltas through [`add`](Self::add); the counter saturates at
/// the total length so a misbehaving server cannot push it past 100%.
#[derive(Debug)]
pub struct TransferState {
    bytes_written: Mutex<u64>,
    total_length: u64,
    resumed_from: u64,
    started_at: Instant,
}

impl TransferState {
    pub fn new(total_length: u64, resumed_from: u64) -> Self {
        let resumed_from = resumed_from.min(total_length);
        Self {
            bytes_written: Mutex::new(resumed_from),
            total_length,
            resumed_from,
            started_at: Instant::now(),
        }
    }

    /// Record `delta` freshly written bytes and return the new total.
    pub fn add(&self, delta: u64) -> u64 {
        let mut written = self.bytes_written.lock();
        *written = written.saturating_add(delta).min(self.total_length);
        *written
    }

    pub fn bytes_written(&self) -> u64 {
        *self.bytes_written.lock()
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        let bytes_written = self.bytes_written();
        ProgressUpdate {
            bytes_written,
            total_length: self.total_length,
            transferred: bytes_written.saturating_sub(self.resumed_from),
            elapsed: self.started_at.elapsed(),
        }
    }
}

/// Point-in-time view of a transfer handed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_written: u64,
    pub total_length: u64,
    /// Bytes fetched by this run, excluding anything resumed from disk.
    pub transferred: u64,
    pub elapsed: Duration,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        if self.total_length == 0 {
            return 100.0;
        }
        self.bytes_written as f64 * 100.0 / self.total_length as f64
    }

    pub fn speed(&self) -> String {
        format_speed(self.transferred, self.elapsed)
    }
}

/// Receives progress from the transfer engine.
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _total_length: u64, _resumed_from: u64) {}

    fn on_progress(&self, update: &ProgressUpdate);

    fn on_finish(&self, _update: &ProgressUpdate) {}
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Emits progress as `tracing` events, at most once per interval.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_interval(label, Duration::from_secs(5))
    }

    pub fn with_interval(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            last: Mutex::new(None),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn on_start(&self, total_length: u64, resumed_from: u64) {
        info!(
            label = %self.label,
            size = %format_bytes(total_length),
            resumed_from,
            "Transfer started"
        );
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        let now = Instant::now();
        {
            let mut last = self.last.lock();
            if let Some(previous) = *last
                && now.duration_since(previous) < self.interval
            {
                return;
            }
            *last = Some(now);
        }
        info!(
            label = %self.label,
            written = %format_bytes(update.bytes_written),
            total = %format_bytes(update.total_length),
            percent = %format!("{:.1}", update.percent()),
            speed = %update.speed(),
            "Transfer progress"
        );
    }

    fn on_finish(&self, update: &ProgressUpdate) {
        info!(
            label = %self.label,
            size = %format_bytes(update.bytes_written),
            elapsed_ms = update.elapsed.as_millis() as u64,
            speed = %update.speed(),
            "Transfer finished"
        );
    }
}

pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Average throughput over `elapsed`, or `N/A` when there is nothing to measure.
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    if bytes == 0 || elapsed < MIN_ELAPSED {
        return "N/A".to_string();
    }
    let per_second = bytes as f64 / elapsed.as_secs_f64();
    format!("{}/s", format_size(per_second as u64, BINARY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_saturates_at_total() {
        let state = TransferState::new(100, 0);
        assert_eq!(state.add(60), 60);
        assert_eq!(state.add(60), 100);
        assert_eq!(state.bytes_written(), 100);
    }

    #[test]
    fn resumed_bytes_do_not_count_as_transferred() {
        let state = TransferState::new(100, 40);
        state.add(10);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.bytes_written, 50);
        assert_eq!(snapshot.transferred, 10);
    }

    #[test]
    fn concurrent_deltas_sum_exactly() {
        let state = Arc::new(TransferState::new(8 * 1000, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        state.add(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.bytes_written(), 8000);
    }

    #[test]
    fn speed_is_not_available_without_elapsed_time() {
        assert_eq!(format_speed(1024, Duration::ZERO), "N/A");
        assert_eq!(format_speed(1024, Duration::from_micros(50)), "N/A");
        assert_eq!(format_speed(0, Duration::from_secs(1)), "N/A");
    }

    #[test]
    fn speed_is_bytes_per_second() {
        assert_eq!(format_speed(2048, Duration::from_secs(2)), "1 KiB/s");
    }

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }
}
