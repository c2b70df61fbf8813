use crate::error::{DeliveryError, Result};

/// A half-open byte range `[start, end)` of the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub end: u64,
}

impl Partition {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for the `Range` header requesting this span.
    ///
    /// Open-ended when `open` is set, which lets a single stream keep
    /// reading even if the probed length was short.
    pub fn range_header(&self, open: bool) -> String {
        if open {
            format!("bytes={}-", self.start)
        } else {
            format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub total_length: u64,
    pub partitions: Vec<Partition>,
}

impl TransferPlan {
    /// Single-stream plans are the only ones that can resume.
    pub fn is_single_stream(&self) -> bool {
        self.partitions.len() <= 1
    }
}

/// Split `total_length` bytes into partitions.
///
/// `None` (unset) and `Some(1)` give one partition starting at
/// `resume_offset`. More threads split `[0, total_length)` into
/// `ceil(total_length / threads)` sized spans with the last one ending at
/// `total_length`; `resume_offset` is ignored because partitioned transfers
/// always start over.
pub fn plan(total_length: u64, threads: Option<u32>, resume_offset: u64) -> Result<TransferPlan> {
    let threads = match threads {
        Some(0) => {
            return Err(DeliveryError::invalid_configuration(
                "thread count must be at least 1",
            ));
        }
        Some(n) => n,
        None => 1,
    };

    if threads == 1 {
        if resume_offset > total_length {
            return Err(DeliveryError::invalid_configuration(format!(
                "resume offset {resume_offset} is past the end of a {total_length} byte resource"
            )));
        }
        return Ok(TransferPlan {
            total_length,
            partitions: vec![Partition {
                start: resume_offset,
                end: total_length,
            }],
        });
    }

    let chunk = total_length.div_ceil(u64::from(threads));
    let mut partitions = Vec::with_capacity(threads as usize);
    let mut start = 0;
    while start < total_length {
        let end = start.saturating_add(chunk).min(total_length);
        partitions.push(Partition { start, end });
        start = end;
    }

    Ok(TransferPlan {
        total_length,
        partitions,
    })
}
