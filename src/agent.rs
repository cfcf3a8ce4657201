//! Agent wiring and lifecycle.
//!
//! The agent owns the association store, the refresh batcher, and the zone
//! view behind a single mutex. The lock is held for the whole of each
//! observation and each eviction pass, so engine events are atomic with
//! respect to one another and to the diagnostic console; the only work done
//! off-lock is the wire exchange of an update transaction.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::Name;
use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{Batch, RefreshBatcher};
use crate::config::AgentConfig;
use crate::console;
use crate::error::AgentError;
use crate::ingest::{self, Observation};
use crate::metrics::{self, ObservationResult, Timer};
use crate::queue::QueueEnd;
use crate::store::{unix_now, AssociationStore, EvictionEvent, Seconds};
use crate::update::{build_update, TcpUpdateClient, UpdateClient, UpdateOp};
use crate::zone::{self, load_zone_file, TxtMetadata, ZoneEntry, ZoneReloadStats, ZoneView};

/// Interval between batcher clock ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Interval for emitting engine state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Telemetry channel capacity; a slow engine pushes back on the listener.
const TELEMETRY_CHANNEL_CAPACITY: usize = 1024;

struct Engine {
    store: AssociationStore,
    batcher: RefreshBatcher,
    zone: ZoneView,
}

struct Inner {
    config: AgentConfig,
    zone_name: Name,
    engine: Mutex<Engine>,
    update_client: Box<dyn UpdateClient>,
    telemetry_tx: mpsc::Sender<Observation>,
    telemetry_rx: Mutex<Option<mpsc::Receiver<Observation>>>,
}

/// Store/zone discrepancies reported by the `a2z` cross-check.
#[derive(Debug, Clone, Default)]
pub struct CrossCheck {
    /// Addresses present in the telemetry view but not (yet) in the zone.
    pub store_only: Vec<IpAddr>,
    /// Addresses the zone still publishes but the telemetry view dropped.
    pub zone_only: Vec<IpAddr>,
}

impl CrossCheck {
    /// Total number of discrepancies.
    pub fn discrepancies(&self) -> usize {
        self.store_only.len() + self.zone_only.len()
    }
}

/// One resolution rendered for diagnostics.
#[derive(Debug, Clone)]
pub struct ResolutionDetails {
    /// The observed chain, terminal last.
    pub chain: Vec<String>,
    /// Terminal name.
    pub terminal: String,
    /// True when this is the cached best resolution.
    pub best: bool,
    /// First seen, delta from now (<= 0).
    pub first_seen_delta: f64,
    /// Last seen, delta from now (<= 0).
    pub last_seen_delta: f64,
    /// Observation count.
    pub query_count: u64,
    /// Inter-query gap estimate.
    pub trend: f64,
    /// Current heuristic score.
    pub score: f64,
    /// True when reconstructed from the zone and never observed live.
    pub reloaded: bool,
}

/// Everything known about one address, for diagnostics.
#[derive(Debug, Clone)]
pub struct AddressDetails {
    /// Resolutions sorted by terminal name.
    pub resolutions: Vec<ResolutionDetails>,
    /// Terminal of the cached best resolution.
    pub best_terminal: Option<String>,
    /// What the zone is believed to publish for this address.
    pub zone_ptr: Option<String>,
}

/// Processing depths across the engine.
#[derive(Debug, Clone, Copy)]
pub struct QueueDepths {
    /// Telemetry datagrams received but not yet applied.
    pub telemetry_backlog: usize,
    /// Associations in the store.
    pub associations: usize,
    /// Resolutions in the store.
    pub resolutions: usize,
    /// Addresses in the eviction queue.
    pub eviction_queue: usize,
    /// Addresses pending in the accumulating batch.
    pub batch_pending: usize,
    /// True while a batch is being written.
    pub batch_writing: bool,
}

/// A slice of the eviction queue, for diagnostics.
#[derive(Debug, Clone)]
pub struct QueueSlice {
    /// Total resolutions in the store.
    pub resolution_count: usize,
    /// The configured bound.
    pub cache_size: usize,
    /// Addresses in queue order from the requested end, with their
    /// resolution counts.
    pub entries: Vec<(IpAddr, usize)>,
}

/// Refresh pipeline snapshot: the live batch plus recent completions.
#[derive(Debug, Clone, Default)]
pub struct RefreshSnapshot {
    /// The batch currently accumulating, if any.
    pub current: Option<Batch>,
    /// True while a batch is being written.
    pub writing: bool,
    /// Recently completed batches, oldest first.
    pub recent: Vec<Batch>,
}

/// The hindsight-dns agent.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Create an agent that commits updates over TCP to the configured
    /// zone master.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let client = TcpUpdateClient::new(
            config.update_target,
            Duration::from_secs(config.update_timeout),
        );
        Self::with_update_client(config, Box::new(client))
    }

    /// Create an agent with a custom update transport.
    pub fn with_update_client(
        config: AgentConfig,
        update_client: Box<dyn UpdateClient>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let zone_name = Name::from_ascii(format!("{}.", config.zone_name.trim_end_matches('.')))?;

        let engine = Engine {
            store: AssociationStore::new(
                config.cache_size,
                config.trending_alpha,
                config.eviction_log_size,
            ),
            batcher: RefreshBatcher::new(
                config.batch_update_size,
                config.batch_update_frequency as Seconds,
                config.batch_threshold,
                config.refresh_log_size,
            ),
            zone: ZoneView::new(),
        };

        let (telemetry_tx, telemetry_rx) = mpsc::channel(TELEMETRY_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                zone_name,
                engine: Mutex::new(engine),
                update_client,
                telemetry_tx,
                telemetry_rx: Mutex::new(Some(telemetry_rx)),
            }),
        })
    }

    /// The zone this agent maintains.
    pub fn zone_name(&self) -> &Name {
        &self.inner.zone_name
    }

    /// Read the configured zone file and seed the zone view and the store.
    pub fn load_zone(&self, now: Seconds) -> Result<ZoneReloadStats, AgentError> {
        let Some(path) = &self.inner.config.zone_file else {
            return Ok(ZoneReloadStats::default());
        };
        let mut engine = self.inner.engine.lock();
        let Engine { store, zone, .. } = &mut *engine;
        load_zone_file(
            path,
            &self.inner.zone_name,
            zone,
            store,
            self.inner.config.log_garbage,
            now,
        )
    }

    /// Apply one observation to the engine.
    ///
    /// Best-resolution changes and shorn addresses (recycled or deleted)
    /// feed the refresh batcher; invalid telemetry is counted and dropped.
    /// Only an invariant violation propagates, and it is fatal.
    pub fn observe(&self, observation: Observation, now: Seconds) -> Result<(), AgentError> {
        let timer = Timer::start();
        let mut engine = self.inner.engine.lock();
        match engine
            .store
            .observe(observation.address, observation.chain, now)
        {
            Ok(outcome) => {
                if outcome.best_changed {
                    metrics::record_best_changed();
                    engine.batcher.add(observation.address, now);
                }
                if let Some(eviction) = outcome.eviction {
                    for address in eviction.recycled.iter().chain(eviction.deleted.iter()) {
                        engine.batcher.add(*address, now);
                    }
                }
                metrics::record_observation(ObservationResult::Applied, timer.elapsed());
                Ok(())
            }
            Err(AgentError::InvalidTelemetry(reason)) => {
                metrics::record_observation(ObservationResult::Invalid, timer.elapsed());
                debug!(address = %observation.address, %reason, "dropped invalid observation");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the batcher clock once: promote the current batch if it is due
    /// and commit it as a single update transaction.
    pub async fn refresh_tick(&self, now: Seconds) {
        let batch = self.inner.engine.lock().batcher.tick(now);
        if let Some(batch) = batch {
            self.commit(batch, now).await;
        }
    }

    /// Commit one batch. Resolutions are looked up at this moment; the
    /// zone view advances only when the master answers NOERROR.
    async fn commit(&self, mut batch: Batch, now: Seconds) {
        let timer = Timer::start();
        let mut ops: Vec<UpdateOp> = Vec::with_capacity(batch.addresses.len());
        let mut resolved: Vec<(IpAddr, Option<(String, TxtMetadata)>)> =
            Vec::with_capacity(batch.addresses.len());

        {
            let mut engine = self.inner.engine.lock();
            for address in batch.addresses.clone() {
                let owner = match zone::reverse_owner(&address, &self.inner.zone_name) {
                    Ok(owner) => owner,
                    Err(e) => {
                        warn!(%address, error = %e, "skipping unbuildable owner name");
                        continue;
                    }
                };
                let best = engine.store.best(&address, now);
                let entry = best.and_then(|(terminal, score)| {
                    engine
                        .store
                        .lookup(&address)
                        .and_then(|a| a.best_resolution())
                        .map(|resolution| {
                            (
                                terminal,
                                TxtMetadata::for_resolution(resolution, score, now),
                            )
                        })
                });
                match entry {
                    Some((terminal, meta)) => match Name::from_ascii(&terminal) {
                        Ok(ptr) => {
                            ops.push(UpdateOp::Replace {
                                owner,
                                ptr,
                                txt: meta.to_txt(),
                            });
                            resolved.push((address, Some((terminal, meta))));
                        }
                        Err(e) => {
                            warn!(%address, %terminal, error = %e, "skipping unbuildable ptr target");
                        }
                    },
                    None => {
                        ops.push(UpdateOp::Delete { owner });
                        resolved.push((address, None));
                    }
                }
            }
        }

        let outcome = match build_update(&self.inner.zone_name, &ops, self.inner.config.ttl) {
            Ok(request) => self.inner.update_client.send_update(request).await,
            Err(e) => Err(e),
        };

        let mut engine = self.inner.engine.lock();
        match outcome {
            Ok(outcome) => {
                batch.rcode = Some(outcome.rcode);
                batch.wire_request_bytes = outcome.request_bytes;
                batch.wire_response_bytes = outcome.response_bytes;
                if outcome.rcode == ResponseCode::NoError {
                    for (address, entry) in resolved {
                        match entry {
                            Some((terminal, meta)) => engine.zone.insert(
                                address,
                                ZoneEntry {
                                    ptr: terminal,
                                    metadata: Some(meta),
                                    updated_at: now,
                                },
                            ),
                            None => engine.zone.remove(&address),
                        }
                    }
                    debug!(addresses = batch.addresses.len(), "zone refresh committed");
                } else {
                    // Failed addresses are not requeued; the next eviction
                    // touching them re-enqueues naturally.
                    warn!(rcode = %outcome.rcode, "zone update refused, zone view not advanced");
                }
            }
            Err(e) => {
                warn!(error = %e, "zone update failed, zone view not advanced");
                batch.error = Some(e.to_string());
            }
        }
        let completed_at = now + timer.elapsed().as_secs_f64();
        engine.batcher.finish(batch, completed_at);
    }

    /// Run the agent until the token is cancelled.
    ///
    /// Pending batches are abandoned on shutdown; the zone is the source of
    /// truth and subsequent telemetry reconstructs anything lost.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let config = &self.inner.config;
        info!(
            zone = %self.inner.zone_name,
            listen_addr = %config.listen_addr,
            update_target = %config.update_target,
            cache_size = config.cache_size,
            "starting hindsight-dns agent"
        );

        if config.zone_file.is_some() {
            let stats = self.load_zone(unix_now())?;
            info!(
                seeded = stats.seeded,
                garbage = stats.garbage,
                "zone view loaded"
            );
        }

        let mut rx = self
            .inner
            .telemetry_rx
            .lock()
            .take()
            .ok_or_else(|| AgentError::Config("agent is already running".to_string()))?;

        let socket = UdpSocket::bind(config.listen_addr).await?;
        info!(addr = %config.listen_addr, "telemetry UDP listening");
        let ingest_handle = tokio::spawn(ingest::run_udp_listener(
            socket,
            self.inner.telemetry_tx.clone(),
            shutdown.clone(),
        ));

        let console_handle = match config.console_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!(%addr, "diagnostic console listening");
                Some(tokio::spawn(console::serve(
                    self.clone(),
                    listener,
                    shutdown.clone(),
                )))
            }
            None => None,
        };

        let metrics_handle = tokio::spawn(metrics_loop(self.clone(), shutdown.clone()));

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("agent shutdown requested");
                    break;
                }

                observation = rx.recv() => {
                    match observation {
                        Some(observation) => self.observe(observation, unix_now())?,
                        None => {
                            warn!("telemetry channel closed");
                            break;
                        }
                    }
                }

                _ = tick.tick() => {
                    // The commit runs as its own task so telemetry keeps
                    // flowing while the wire exchange is outstanding. The
                    // batcher's writer slot keeps commits serialized.
                    let agent = self.clone();
                    tokio::spawn(async move {
                        agent.refresh_tick(unix_now()).await;
                    });
                }
            }
        }

        let _ = ingest_handle.await;
        if let Some(handle) = console_handle {
            let _ = handle.await;
        }
        let _ = metrics_handle.await;

        info!("agent stopped");
        Ok(())
    }

    /// Cross-check the telemetry view against the zone view.
    pub fn cross_check(&self) -> CrossCheck {
        let engine = self.inner.engine.lock();
        let mut store_addresses: Vec<IpAddr> = engine.store.addresses().collect();
        store_addresses.sort_unstable();

        let mut check = CrossCheck::default();
        for address in &store_addresses {
            if engine.zone.get(address).is_none() {
                check.store_only.push(*address);
            }
        }
        for address in engine.zone.addresses() {
            if engine.store.lookup(&address).is_none() {
                check.zone_only.push(address);
            }
        }
        check
    }

    /// Everything known about one address. `None` when it is not in the
    /// store.
    pub fn address_details(&self, address: &IpAddr, now: Seconds) -> Option<AddressDetails> {
        let engine = self.inner.engine.lock();
        let association = engine.store.lookup(address)?;
        let best_terminal = association.best_terminal().map(str::to_string);
        let resolutions = association
            .resolutions()
            .iter()
            .map(|(terminal, resolution)| ResolutionDetails {
                chain: resolution.chain().to_vec(),
                terminal: terminal.clone(),
                best: best_terminal.as_deref() == Some(terminal.as_str()),
                first_seen_delta: resolution.first_seen - now,
                last_seen_delta: resolution.last_seen - now,
                query_count: resolution.query_count,
                trend: resolution.trend,
                score: engine.store.score(resolution, now),
                reloaded: resolution.is_reloaded(),
            })
            .collect();
        Some(AddressDetails {
            resolutions,
            best_terminal,
            zone_ptr: engine.zone.get(address).map(|entry| entry.ptr.clone()),
        })
    }

    /// The zone view entry for an address.
    pub fn zone_entry(&self, address: &IpAddr) -> Option<ZoneEntry> {
        self.inner.engine.lock().zone.get(address).cloned()
    }

    /// Processing depths across the engine.
    pub fn queue_depths(&self) -> QueueDepths {
        let engine = self.inner.engine.lock();
        QueueDepths {
            telemetry_backlog: self.inner.telemetry_tx.max_capacity()
                - self.inner.telemetry_tx.capacity(),
            associations: engine.store.association_count(),
            resolutions: engine.store.resolution_count(),
            eviction_queue: engine.store.queue().len(),
            batch_pending: engine
                .batcher
                .current()
                .map(|b| b.addresses.len())
                .unwrap_or(0),
            batch_writing: engine.batcher.writing(),
        }
    }

    /// Addresses at one end of the eviction queue.
    pub fn queue_slice(&self, end: QueueEnd, n: usize) -> QueueSlice {
        let engine = self.inner.engine.lock();
        let entries = engine
            .store
            .queue()
            .slice(end, n)
            .into_iter()
            .map(|address| {
                let count = engine
                    .store
                    .lookup(&address)
                    .map(|a| a.resolutions().len())
                    .unwrap_or(0);
                (address, count)
            })
            .collect();
        QueueSlice {
            resolution_count: engine.store.resolution_count(),
            cache_size: engine.store.cache_size(),
            entries,
        }
    }

    /// The most recent `n` eviction events, oldest first.
    pub fn recent_evictions(&self, n: usize) -> Vec<EvictionEvent> {
        self.inner.engine.lock().store.recent_evictions(n)
    }

    /// Refresh pipeline snapshot with the most recent `n` completed
    /// batches.
    pub fn recent_refreshes(&self, n: usize) -> RefreshSnapshot {
        let engine = self.inner.engine.lock();
        RefreshSnapshot {
            current: engine.batcher.current().cloned(),
            writing: engine.batcher.writing(),
            recent: engine.batcher.recent(n),
        }
    }

    fn emit_metrics(&self) {
        let engine = self.inner.engine.lock();
        metrics::record_engine_counts(
            engine.store.association_count(),
            engine.store.resolution_count(),
            engine.store.queue().len(),
            engine.zone.len(),
        );
    }
}

/// Periodically emit engine state metrics.
async fn metrics_loop(agent: Agent, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                agent.emit_metrics();
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}
