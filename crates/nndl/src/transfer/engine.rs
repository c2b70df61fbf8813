use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use super::plan::{Partition, TransferPlan, plan};
use super::progress::{ProgressObserver, TransferState};
use crate::config::TransferConfig;
use crate::error::{DeliveryError, Result};
use crate::http::HttpClient;

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub total_length: u64,
    pub bytes_written: u64,
    /// Offset the transfer resumed from, zero for fresh transfers.
    pub resumed_from: u64,
    pub partitions: usize,
    /// The partial file failed the overlap check and was downloaded again.
    pub restarted: bool,
    /// The destination was already complete and nothing was fetched.
    pub already_complete: bool,
    pub elapsed: Duration,
}

/// Materializes a remote resource on disk.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: HttpClient,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(client: HttpClient, config: TransferConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Download `url` into `destination`.
    ///
    /// With more than one thread configured the resource is split into
    /// partitions fetched concurrently; otherwise a single stream is used and
    /// an existing partial file is resumed after an overlap check.
    #[instrument(skip(self, observer, token), fields(url = %url))]
    pub async fn execute(
        &self,
        url: &Url,
        total_length: u64,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        let layout = plan(total_length, self.config.threads, 0)?;

        if self.config.threads.is_some_and(|n| n > 1) {
            self.execute_partitioned(url, layout, destination, observer, token)
                .await
        } else {
            self.execute_single(url, total_length, destination, observer, token)
                .await
        }
    }

    async fn execute_single(
        &self,
        url: &Url,
        total_length: u64,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        let mut restarted = false;
        loop {
            match self
                .single_attempt(url, total_length, destination, observer.as_ref(), token)
                .await
            {
                Err(DeliveryError::IntegrityMismatch { offset }) if !restarted => {
                    warn!(
                        offset,
                        path = %destination.display(),
                        "Partial file does not match the remote content, restarting from scratch"
                    );
                    discard(destination).await?;
                    restarted = true;
                }
                Ok(report) => return Ok(TransferReport { restarted, ..report }),
                Err(e) => return Err(e),
            }
        }
    }

    async fn single_attempt(
        &self,
        url: &Url,
        total_length: u64,
        destination: &Path,
        observer: &dyn ProgressObserver,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        let block_size = self.config.block_size.max(1);
        let mut resume_from = 0;

        match local_length(destination).await? {
            Some(local) if local == total_length => {
                info!(path = %destination.display(), "Destination is already complete");
                let state = TransferState::new(total_length, local);
                observer.on_finish(&state.snapshot());
                return Ok(TransferReport {
                    total_length,
                    bytes_written: local,
                    resumed_from: local,
                    partitions: 0,
                    restarted: false,
                    already_complete: true,
                    elapsed: Duration::ZERO,
                });
            }
            Some(local) if local > total_length => {
                if !self.config.force_highest {
                    return Err(DeliveryError::LengthMismatch {
                        local,
                        remote: total_length,
                    });
                }
                warn!(
                    local,
                    remote = total_length,
                    "Local file is larger than the forced source, discarding it"
                );
                discard(destination).await?;
            }
            Some(local) if local > block_size as u64 => resume_from = local,
            Some(local) => {
                debug!(local, block_size, "Partial file is within one block, starting over");
            }
            None => {}
        }

        let layout = plan(total_length, None, resume_from)?;
        let span = layout
            .partitions
            .first()
            .copied()
            .ok_or_else(|| DeliveryError::internal("single-stream plan has no partition"))?;

        let overlap_start = resume_from.saturating_sub(block_size as u64);
        let mut file = if resume_from > 0 {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(destination)
                .await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(destination)
                .await
        }
        .map_err(|e| DeliveryError::file_system(destination, e))?;

        let local_overlap = if resume_from > 0 {
            let mut buf = vec![0u8; (resume_from - overlap_start) as usize];
            file.seek(SeekFrom::Start(overlap_start))
                .await
                .map_err(|e| DeliveryError::file_system(destination, e))?;
            file.read_exact(&mut buf)
                .await
                .map_err(|e| DeliveryError::file_system(destination, e))?;
            Some(Bytes::from(buf))
        } else {
            None
        };

        let state = TransferState::new(total_length, resume_from);
        observer.on_start(total_length, resume_from);

        if span.is_empty() {
            file.flush()
                .await
                .map_err(|e| DeliveryError::file_system(destination, e))?;
            let update = state.snapshot();
            observer.on_finish(&update);
            return Ok(report(&layout, resume_from, update.bytes_written, update.elapsed));
        }

        let request = Partition {
            start: overlap_start,
            end: total_length,
        };
        info!(
            from = request.start,
            resume_from,
            total_length,
            "Starting single-stream transfer"
        );
        let range = request.range_header(true);
        let response = self
            .client
            .send(
                "ranged GET",
                |c| c.get(url.clone()).header(RANGE, range.as_str()),
                token,
            )
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            warn!(status = %response.status(), "Ranged request answered without partial content");
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut pending = BytesMut::new();

        if let Some(local) = local_overlap {
            let mut prefix = read_prefix(&mut stream, local.len(), token).await?;
            if prefix.len() < local.len() {
                return Err(DeliveryError::IncompleteBody {
                    expected: resume_from,
                    received: overlap_start + prefix.len() as u64,
                });
            }
            pending = prefix.split_off(local.len());
            if prefix[..] != local[..] {
                return Err(DeliveryError::IntegrityMismatch {
                    offset: overlap_start,
                });
            }
            debug!(offset = overlap_start, "Overlap block verified, resuming");
        }

        file.seek(SeekFrom::Start(span.start))
            .await
            .map_err(|e| DeliveryError::file_system(destination, e))?;
        let mut sink = BlockSink {
            file: &mut file,
            path: destination,
            position: span.start,
            end: span.end,
        };
        copy_body(&mut stream, pending, &mut sink, block_size, token, |written| {
            state.add(written);
            observer.on_progress(&state.snapshot());
        })
        .await?;

        let update = state.snapshot();
        observer.on_finish(&update);
        info!(
            bytes = update.bytes_written,
            elapsed_ms = update.elapsed.as_millis() as u64,
            "Single-stream transfer finished"
        );
        Ok(report(&layout, resume_from, update.bytes_written, update.elapsed))
    }

    async fn execute_partitioned(
        &self,
        url: &Url,
        layout: TransferPlan,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        let total_length = layout.total_length;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(destination)
            .await
            .map_err(|e| DeliveryError::file_system(destination, e))?;
        file.set_len(total_length)
            .await
            .map_err(|e| DeliveryError::file_system(destination, e))?;
        drop(file);

        info!(
            total_length,
            partitions = layout.partitions.len(),
            "Starting partitioned transfer"
        );

        let state = Arc::new(TransferState::new(total_length, 0));
        observer.on_start(total_length, 0);

        let workers_token = token.child_token();
        let mut workers = JoinSet::new();
        for (index, partition) in layout.partitions.iter().copied().enumerate() {
            let worker = PartitionWorker {
                index,
                partition,
                client: self.client.clone(),
                url: url.clone(),
                path: destination.to_path_buf(),
                block_size: self.config.block_size.max(1),
                state: Arc::clone(&state),
            };
            let token = workers_token.clone();
            workers.spawn(async move { worker.run(&token).await });
        }

        let reporter_token = workers_token.child_token();
        let reporter = tokio::spawn(report_progress(
            Arc::clone(&state),
            Arc::clone(&observer),
            self.config.progress_interval,
            reporter_token.clone(),
        ));

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .map_err(|e| DeliveryError::internal(format!("partition worker panicked: {e}")))
                .and_then(|r| r);
            if let Err(e) = result
                && failure.is_none()
            {
                if !matches!(e, DeliveryError::Cancelled) {
                    error!(error = %e, "Partition failed, aborting transfer");
                }
                workers_token.cancel();
                failure = Some(e);
            }
        }

        reporter_token.cancel();
        if let Err(e) = reporter.await {
            debug!(error = %e, "Progress reporter ended abnormally");
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let update = state.snapshot();
        observer.on_progress(&update);
        observer.on_finish(&update);
        info!(
            bytes = update.bytes_written,
            elapsed_ms = update.elapsed.as_millis() as u64,
            "Partitioned transfer finished"
        );
        Ok(report(&layout, 0, update.bytes_written, update.elapsed))
    }
}

struct PartitionWorker {
    index: usize,
    partition: Partition,
    client: HttpClient,
    url: Url,
    path: PathBuf,
    block_size: usize,
    state: Arc<TransferState>,
}

impl PartitionWorker {
    async fn run(self, token: &CancellationToken) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| DeliveryError::file_system(&self.path, e))?;
        file.seek(SeekFrom::Start(self.partition.start))
            .await
            .map_err(|e| DeliveryError::file_system(&self.path, e))?;

        let range = self.partition.range_header(false);
        trace!(partition = self.index, range = %range, "Requesting partition");
        let response = self
            .client
            .send(
                "partition GET",
                |c| c.get(self.url.clone()).header(RANGE, range.as_str()),
                token,
            )
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            warn!(
                partition = self.index,
                status = %response.status(),
                "Ranged request answered without partial content"
            );
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut sink = BlockSink {
            file: &mut file,
            path: &self.path,
            position: self.partition.start,
            end: self.partition.end,
        };
        let state = &self.state;
        copy_body(
            &mut stream,
            BytesMut::new(),
            &mut sink,
            self.block_size,
            token,
            |written| {
                state.add(written);
            },
        )
        .await?;

        trace!(partition = self.index, "Partition complete");
        Ok(())
    }
}

async fn report_progress(
    state: Arc<TransferState>,
    observer: Arc<dyn ProgressObserver>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let update = state.snapshot();
        observer.on_progress(&update);
        if update.bytes_written >= update.total_length {
            return;
        }
    }
}

/// Write target bounded to `[position, end)`.
struct BlockSink<'a> {
    file: &'a mut File,
    path: &'a Path,
    position: u64,
    end: u64,
}

impl BlockSink<'_> {
    fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.position)
    }

    /// Write what fits before `end` and return how much was written.
    async fn write(&mut self, data: &[u8]) -> Result<u64> {
        let take = (data.len() as u64).min(self.remaining()) as usize;
        if take > 0 {
            self.file
                .write_all(&data[..take])
                .await
                .map_err(|e| DeliveryError::file_system(self.path, e))?;
            self.position += take as u64;
        }
        Ok(take as u64)
    }
}

/// Pull at least `len` bytes off the stream, fewer only if it ends first.
async fn read_prefix<S>(stream: &mut S, len: usize, token: &CancellationToken) -> Result<BytesMut>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut buf = BytesMut::with_capacity(len);
    while buf.len() < len {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DeliveryError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf)
}

/// Copy the body into `sink` in `block_size` blocks, in order.
///
/// `on_block` receives the size of every block written. Data past the end of
/// the sink is dropped; a body that ends before it fails with
/// [`DeliveryError::IncompleteBody`].
async fn copy_body<S, F>(
    stream: &mut S,
    mut pending: BytesMut,
    sink: &mut BlockSink<'_>,
    block_size: usize,
    token: &CancellationToken,
    mut on_block: F,
) -> Result<()>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    F: FnMut(u64),
{
    let mut finished = false;
    while sink.remaining() > 0 {
        if pending.len() < block_size && !finished {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DeliveryError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(chunk) => {
                    pending.extend_from_slice(&chunk?);
                    continue;
                }
                None => finished = true,
            }
        }

        let take = pending.len().min(block_size);
        if take == 0 {
            break;
        }
        let block = pending.split_to(take);
        let written = sink.write(&block).await?;
        if written > 0 {
            on_block(written);
        }
    }

    if sink.remaining() == 0 && !pending.is_empty() {
        warn!(
            extra = pending.len(),
            "Server sent more data than requested, ignoring the excess"
        );
    }

    sink.file
        .flush()
        .await
        .map_err(|e| DeliveryError::file_system(sink.path, e))?;

    if sink.remaining() > 0 {
        return Err(DeliveryError::IncompleteBody {
            expected: sink.end,
            received: sink.position,
        });
    }
    Ok(())
}

fn report(layout: &TransferPlan, resumed_from: u64, bytes_written: u64, elapsed: Duration) -> TransferReport {
    TransferReport {
        total_length: layout.total_length,
        bytes_written,
        resumed_from,
        partitions: layout.partitions.len(),
        restarted: false,
        already_complete: false,
        elapsed,
    }
}

async fn local_length(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DeliveryError::file_system(path, e)),
    }
}

async fn discard(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeliveryError::file_system(path, e)),
    }
}
