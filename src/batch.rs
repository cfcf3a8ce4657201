//! Zone-refresh batching.
//!
//! Shorn and re-ranked addresses are coalesced into batches, each committed
//! to the zone master as a single dynamic-update transaction. A batch
//! accumulates until its timer has run and it is full enough to be worth a
//! write; at most one batch is ever in flight.

use std::collections::VecDeque;
use std::net::IpAddr;

use hickory_proto::op::ResponseCode;

use crate::store::Seconds;

/// Lifecycle of a batch. Transitions are monotonic and one-way:
/// `New -> Accumulating -> Writing -> Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Created, nothing appended yet.
    New,
    /// Holding at least one address, waiting on the write conditions.
    Accumulating,
    /// Handed to the update transport; exactly one batch may be here.
    Writing,
    /// Finished, successfully or not. Terminal.
    Complete,
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BatchState::New => "new",
            BatchState::Accumulating => "accumulating",
            BatchState::Writing => "writing",
            BatchState::Complete => "complete",
        };
        f.write_str(label)
    }
}

/// One unit of zone-refresh work and its statistics.
#[derive(Debug, Clone)]
pub struct Batch {
    /// When the batch was created.
    pub created_at: Seconds,
    /// Current lifecycle state.
    pub state: BatchState,
    /// Attempted additions, including those dropped by the cap or already
    /// pending.
    pub add_calls: u64,
    /// Addresses accepted into the batch, capped at the configured size.
    pub addresses: Vec<IpAddr>,
    /// When the batch was promoted to `Writing`.
    pub writing_at: Option<Seconds>,
    /// When the batch reached `Complete`.
    pub completed_at: Option<Seconds>,
    /// Response code of the update transaction, when one arrived.
    pub rcode: Option<ResponseCode>,
    /// Transport error, when the transaction never got a response.
    pub error: Option<String>,
    /// Size of the update request on the wire.
    pub wire_request_bytes: usize,
    /// Size of the response on the wire.
    pub wire_response_bytes: usize,
}

impl Batch {
    fn new(now: Seconds) -> Self {
        Self {
            created_at: now,
            state: BatchState::New,
            add_calls: 0,
            addresses: Vec::new(),
            writing_at: None,
            completed_at: None,
            rcode: None,
            error: None,
            wire_request_bytes: 0,
            wire_response_bytes: 0,
        }
    }

    /// Seconds spent accumulating before the write began. `None` until the
    /// batch has been promoted.
    pub fn elapsed_accumulating(&self) -> Option<Seconds> {
        self.writing_at.map(|t| t - self.created_at)
    }

    /// Seconds spent writing. `None` until the batch completed.
    pub fn elapsed_processing(&self) -> Option<Seconds> {
        match (self.writing_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// True when the batch completed without a response-code or transport
    /// error.
    pub fn succeeded(&self) -> bool {
        self.state == BatchState::Complete
            && self.error.is_none()
            && self.rcode == Some(ResponseCode::NoError)
    }
}

/// Accumulates addresses into batches and decides when each one writes.
///
/// The batcher holds addresses only; resolutions are looked up against the
/// store at commit time, which is when the consistency window between the
/// telemetry view and the zone view closes.
#[derive(Debug)]
pub struct RefreshBatcher {
    batch_size: usize,
    frequency: Seconds,
    threshold: f64,
    current: Option<Batch>,
    in_flight: bool,
    log: VecDeque<Batch>,
    log_size: usize,
}

impl RefreshBatcher {
    /// Create a batcher.
    ///
    /// `batch_size` caps addresses per batch, `frequency` is the minimum
    /// seconds between writes, and `threshold` (0.0-1.0) is the fractional
    /// fill required before the timer alone triggers a write.
    pub fn new(batch_size: usize, frequency: Seconds, threshold: f64, log_size: usize) -> Self {
        Self {
            batch_size,
            frequency,
            threshold,
            current: None,
            in_flight: false,
            log: VecDeque::with_capacity(log_size),
            log_size,
        }
    }

    /// Offer an address to the current batch, creating one if needed.
    ///
    /// The attempt always counts in `add_calls`; the address is appended
    /// only while the batch is below its cap and does not already hold it.
    pub fn add(&mut self, address: IpAddr, now: Seconds) {
        let batch = self.current.get_or_insert_with(|| Batch::new(now));
        batch.add_calls += 1;
        if !matches!(batch.state, BatchState::New | BatchState::Accumulating) {
            return;
        }
        if batch.addresses.len() >= self.batch_size || batch.addresses.contains(&address) {
            return;
        }
        batch.addresses.push(address);
        if batch.state == BatchState::New {
            batch.state = BatchState::Accumulating;
        }
    }

    /// Periodic clock. Promotes the current batch to `Writing` and hands it
    /// to the caller when its timer has run, it is full enough, and no
    /// other batch is in flight. A full batch writes regardless of the
    /// threshold; a stale but sparse one keeps accumulating.
    pub fn tick(&mut self, now: Seconds) -> Option<Batch> {
        if self.in_flight {
            return None;
        }
        let ready = match &self.current {
            Some(batch) => {
                batch.state == BatchState::Accumulating
                    && now - batch.created_at >= self.frequency
                    && batch.addresses.len() as f64 >= self.batch_size as f64 * self.threshold
            }
            None => false,
        };
        if !ready {
            return None;
        }
        let mut batch = self.current.take()?;
        batch.state = BatchState::Writing;
        batch.writing_at = Some(now);
        self.in_flight = true;
        Some(batch)
    }

    /// Return a written batch with its outcome filled in. Records it in the
    /// refresh log and frees the writer slot.
    pub fn finish(&mut self, mut batch: Batch, now: Seconds) {
        batch.state = BatchState::Complete;
        batch.completed_at = Some(now);
        self.in_flight = false;
        crate::metrics::record_batch(&batch);
        if self.log_size > 0 {
            if self.log.len() == self.log_size {
                self.log.pop_front();
            }
            self.log.push_back(batch);
        }
    }

    /// The batch currently accumulating, if any.
    pub fn current(&self) -> Option<&Batch> {
        self.current.as_ref()
    }

    /// True while a batch is being written.
    pub fn writing(&self) -> bool {
        self.in_flight
    }

    /// The most recent `n` completed batches in chronological order.
    pub fn recent(&self, n: usize) -> Vec<Batch> {
        let skip = self.log.len().saturating_sub(n);
        self.log.iter().skip(skip).cloned().collect()
    }
}
