#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nndl_engine::transfer::{ProgressObserver, ProgressUpdate};
use nndl_engine::{HttpClient, HttpConfig, RetryPolicy};
use parking_lot::Mutex;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        },
        use_system_proxy: false,
        ..HttpConfig::default()
    }
}

pub fn client() -> HttpClient {
    HttpClient::new(&http_config()).unwrap()
}

/// Serves `data` honouring single `Range: bytes=start-[end]` headers.
#[derive(Clone)]
pub struct RangedBody {
    pub data: Arc<Vec<u8>>,
    /// When false every request gets the full body with 200.
    pub honour_range: bool,
}

impl RangedBody {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            honour_range: true,
        }
    }
}

impl Respond for RangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.data.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, _)) if self.honour_range && start >= total => {
                ResponseTemplate::new(416).insert_header("content-range", format!("bytes */{total}"))
            }
            Some((start, end)) if self.honour_range => {
                let end = end.unwrap_or(total - 1).min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{total}"))
                    .set_body_bytes(self.data[start as usize..=end as usize].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.data.to_vec()),
        }
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start.parse().ok()?, end))
}

/// Range headers of every GET the server received, in arrival order.
pub async fn received_ranges(server: &wiremock::MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .filter_map(|r| r.headers.get("range"))
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

/// Observer keeping every update it sees.
#[derive(Default)]
pub struct Recorder {
    pub started: Mutex<Vec<(u64, u64)>>,
    pub updates: Mutex<Vec<ProgressUpdate>>,
    pub finished: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressObserver for Recorder {
    fn on_start(&self, total_length: u64, resumed_from: u64) {
        self.started.lock().push((total_length, resumed_from));
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        self.updates.lock().push(*update);
    }

    fn on_finish(&self, update: &ProgressUpdate) {
        self.finished.lock().push(*update);
    }
}
