//! The telemetry view: associations, resolutions, and eviction.
//!
//! The [`AssociationStore`] is the sole writer to associations and
//! resolutions. It enforces the cache bound by shearing low-scoring
//! resolutions from the most idle addresses, recycling survivors to the
//! fresh end of the queue, and reporting the shorn addresses so the zone
//! refresh pipeline can pick them up.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::AgentError;
use crate::heuristic::{AttenuatingScorer, Scorer};
use crate::metrics;
use crate::queue::EvictionQueue;

/// Wall-clock time as UNIX seconds. The resolution math is floating-point
/// throughout, so timestamps are carried the same way.
pub type Seconds = f64;

/// Current wall-clock time in UNIX seconds.
pub fn unix_now() -> Seconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One observed forward chain leading to an address.
///
/// The chain runs query-name first; the final element is the terminal name,
/// the one closest to the address. The terminal uniquely identifies a
/// resolution within its association.
#[derive(Debug, Clone)]
pub struct Resolution {
    chain: Vec<String>,
    /// Observations of this chain, incremented once per telemetry event.
    pub query_count: u64,
    /// Wall-clock seconds at the first observation. Immutable afterwards.
    pub first_seen: Seconds,
    /// Wall-clock seconds at the most recent observation.
    pub last_seen: Seconds,
    /// Exponentially weighted estimate of the inter-query gap.
    pub trend: f64,
    /// Score carried over from the zone at startup. `Some` marks a
    /// resolution reconstructed from the zone rather than observed live;
    /// such a resolution has no meaningful chain and is only selectable as
    /// best when nothing live exists.
    pub reload_score: Option<f64>,
}

impl Resolution {
    /// A resolution created from a live observation at `now`.
    pub fn observed(chain: Vec<String>, now: Seconds) -> Self {
        Self {
            chain,
            query_count: 1,
            first_seen: now,
            last_seen: now,
            trend: 0.0,
            reload_score: None,
        }
    }

    /// A placeholder resolution reconstructed from the zone at startup.
    pub fn reloaded(terminal: String, first_seen: Seconds, last_seen: Seconds, score: f64) -> Self {
        Self {
            chain: vec![terminal],
            query_count: 1,
            first_seen,
            last_seen,
            trend: 0.0,
            reload_score: Some(score),
        }
    }

    /// The full observed chain, terminal name last.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// The terminal name: the final chain element, closest to the address.
    pub fn terminal(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }

    /// Chain length.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    /// True when this resolution was reconstructed from the zone and has
    /// not been observed live since.
    pub fn is_reloaded(&self) -> bool {
        self.reload_score.is_some()
    }

    fn seen(&mut self, now: Seconds, alpha: f64) {
        let gap = (now - self.last_seen).max(0.0);
        self.trend = (1.0 - alpha) * self.trend + alpha * gap;
        self.last_seen = now;
        self.query_count += 1;
    }

    /// Replace the placeholder chain with a live one and clear the reload
    /// marker. `first_seen` is kept; the zone's record of it predates this
    /// process.
    fn adopt_live_chain(&mut self, chain: Vec<String>) {
        self.chain = chain;
        self.reload_score = None;
    }
}

/// All resolutions observed for one address, plus the cached best selection.
#[derive(Debug)]
pub struct Association {
    address: IpAddr,
    resolutions: BTreeMap<String, Resolution>,
    best: Option<String>,
}

impl Association {
    fn new(address: IpAddr) -> Self {
        Self {
            address,
            resolutions: BTreeMap::new(),
            best: None,
        }
    }

    /// The address this association is keyed by.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Resolutions keyed by terminal name.
    pub fn resolutions(&self) -> &BTreeMap<String, Resolution> {
        &self.resolutions
    }

    /// Terminal name of the cached best resolution, if one was computed.
    pub fn best_terminal(&self) -> Option<&str> {
        self.best.as_deref()
    }

    /// The cached best resolution, if one was computed.
    pub fn best_resolution(&self) -> Option<&Resolution> {
        self.best.as_deref().and_then(|t| self.resolutions.get(t))
    }

    /// Highest-scoring resolution as of `now`. Reload placeholders are
    /// skipped while anything live exists; score ties go to the
    /// lexicographically first terminal.
    fn select_best(&self, scorer: &dyn Scorer, now: Seconds) -> Option<(String, f64)> {
        let only_reloaded = self.resolutions.values().all(Resolution::is_reloaded);
        let mut pick: Option<(f64, &String)> = None;
        for (terminal, resolution) in &self.resolutions {
            if resolution.is_reloaded() && !only_reloaded {
                continue;
            }
            let score = scorer.score(resolution, now);
            match pick {
                Some((best_score, _)) if score <= best_score => {}
                _ => pick = Some((score, terminal)),
            }
        }
        pick.map(|(score, terminal)| (terminal.clone(), score))
    }
}

/// What an observation did to the store.
#[derive(Debug, Default)]
pub struct ObserveOutcome {
    /// The address had not been seen before.
    pub created_association: bool,
    /// The terminal had not been seen for this address before.
    pub created_resolution: bool,
    /// The cached best resolution changed.
    pub best_changed: bool,
    /// An eviction pass ran because the observation pushed the store over
    /// its bound.
    pub eviction: Option<EvictionOutcome>,
}

/// Addresses touched by an eviction pass, in selection order.
#[derive(Debug, Clone, Default)]
pub struct EvictionOutcome {
    /// Selected associations that survived with at least one resolution and
    /// were pushed back to the fresh end of the queue.
    pub recycled: Vec<IpAddr>,
    /// Selected associations left with no resolutions, removed from the
    /// store and the queue.
    pub deleted: Vec<IpAddr>,
}

/// One resolution removed by an eviction pass.
#[derive(Debug, Clone)]
pub struct RemovedResolution {
    /// Address the resolution belonged to.
    pub address: IpAddr,
    /// Terminal name of the removed resolution.
    pub terminal: String,
    /// Its score at eviction time.
    pub score: f64,
}

/// Diagnostic record of one eviction pass.
#[derive(Debug, Clone)]
pub struct EvictionEvent {
    /// When the pass ran.
    pub timestamp: Seconds,
    /// Resolutions over the bound when the pass started.
    pub overage: usize,
    /// The configured bound.
    pub target_pool: usize,
    /// Cumulative resolution count across the selected associations.
    pub working_pool: usize,
    /// Number of associations selected from the idle end of the queue.
    pub selected: usize,
    /// Resolutions left in the store after the pass.
    pub resolutions_after: usize,
    /// Addresses that lost at least one resolution.
    pub affected: Vec<IpAddr>,
    /// Addresses recycled to the fresh end of the queue.
    pub recycled: Vec<IpAddr>,
    /// Addresses deleted outright.
    pub deleted: Vec<IpAddr>,
    /// Removed resolutions, lowest score first.
    pub removed: Vec<RemovedResolution>,
}

/// Bounded ring of recent eviction events.
#[derive(Debug)]
pub struct EvictionLog {
    events: VecDeque<EvictionEvent>,
    capacity: usize,
}

impl EvictionLog {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: EvictionEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The most recent `n` events in chronological order.
    pub fn recent(&self, n: usize) -> Vec<EvictionEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// The association store: address -> resolutions, plus the eviction queue
/// and the bound enforcement.
pub struct AssociationStore {
    associations: HashMap<IpAddr, Association>,
    queue: EvictionQueue,
    resolution_count: usize,
    cache_size: usize,
    trending_alpha: f64,
    scorer: Box<dyn Scorer>,
    eviction_log: EvictionLog,
}

impl AssociationStore {
    /// Create a store bounded at `cache_size` resolutions, using the
    /// default scorer.
    pub fn new(cache_size: usize, trending_alpha: f64, eviction_log_size: usize) -> Self {
        Self::with_scorer(
            cache_size,
            trending_alpha,
            eviction_log_size,
            Box::new(AttenuatingScorer),
        )
    }

    /// Create a store with a custom scoring strategy.
    pub fn with_scorer(
        cache_size: usize,
        trending_alpha: f64,
        eviction_log_size: usize,
        scorer: Box<dyn Scorer>,
    ) -> Self {
        Self {
            associations: HashMap::new(),
            queue: EvictionQueue::new(),
            resolution_count: 0,
            cache_size,
            trending_alpha,
            scorer,
            eviction_log: EvictionLog::new(eviction_log_size),
        }
    }

    /// Record one observed chain for `address` at time `now`.
    ///
    /// Finds or creates the association and the resolution keyed by the
    /// chain's terminal name, bumps its counters, freshens the address in
    /// the eviction queue, and runs an eviction pass if the store is now
    /// over its bound. Two observations with identical arguments are two
    /// observations; there is no deduplication.
    pub fn observe(
        &mut self,
        address: IpAddr,
        chain: Vec<String>,
        now: Seconds,
    ) -> Result<ObserveOutcome, AgentError> {
        validate_chain(&chain)?;

        let terminal = chain.last().cloned().unwrap_or_default();
        let scorer = &*self.scorer;
        let alpha = self.trending_alpha;

        let created_association = !self.associations.contains_key(&address);
        let association = self
            .associations
            .entry(address)
            .or_insert_with(|| Association::new(address));

        let created_resolution = match association.resolutions.get_mut(&terminal) {
            Some(resolution) => {
                if resolution.is_reloaded() {
                    resolution.adopt_live_chain(chain);
                }
                resolution.seen(now, alpha);
                false
            }
            None => {
                association
                    .resolutions
                    .insert(terminal.clone(), Resolution::observed(chain, now));
                true
            }
        };
        if created_resolution {
            self.resolution_count += 1;
        }

        let previous_best = association.best.clone();
        association.best = association.select_best(scorer, now).map(|(t, _)| t);
        let best_changed = association.best != previous_best;

        self.queue.touch(address);

        let eviction = if self.resolution_count > self.cache_size {
            Some(self.shear(now)?)
        } else {
            None
        };

        Ok(ObserveOutcome {
            created_association,
            created_resolution,
            best_changed,
            eviction,
        })
    }

    /// Seed a placeholder resolution reconstructed from the zone.
    ///
    /// Returns `false` without touching counters when live data for the
    /// terminal already exists. May trigger an eviction pass like any
    /// insert.
    pub fn seed_reloaded(
        &mut self,
        address: IpAddr,
        terminal: String,
        first_seen: Seconds,
        last_seen: Seconds,
        score: f64,
        now: Seconds,
    ) -> Result<bool, AgentError> {
        let association = self
            .associations
            .entry(address)
            .or_insert_with(|| Association::new(address));
        if association.resolutions.contains_key(&terminal) {
            self.queue.touch(address);
            return Ok(false);
        }
        association.resolutions.insert(
            terminal.clone(),
            Resolution::reloaded(terminal, first_seen, last_seen, score),
        );
        self.resolution_count += 1;
        self.queue.touch(address);

        if self.resolution_count > self.cache_size {
            self.shear(now)?;
        }
        Ok(true)
    }

    /// Current association snapshot for `address`. Does not touch the
    /// eviction queue.
    pub fn lookup(&self, address: &IpAddr) -> Option<&Association> {
        self.associations.get(address)
    }

    /// Recompute and cache the best resolution for `address`, returning its
    /// terminal and score. `None` when the address is not present.
    pub fn best(&mut self, address: &IpAddr, now: Seconds) -> Option<(String, f64)> {
        let scorer = &*self.scorer;
        let association = self.associations.get_mut(address)?;
        let selected = association.select_best(scorer, now);
        association.best = selected.as_ref().map(|(t, _)| t.clone());
        selected
    }

    /// Score one resolution with the store's scorer.
    pub fn score(&self, resolution: &Resolution, now: Seconds) -> f64 {
        self.scorer.score(resolution, now)
    }

    /// Total resolutions across all associations.
    pub fn resolution_count(&self) -> usize {
        self.resolution_count
    }

    /// Number of associations.
    pub fn association_count(&self) -> usize {
        self.associations.len()
    }

    /// The configured resolution bound.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Change the resolution bound. A shrunken bound converges through
    /// subsequent eviction passes; nothing is evicted eagerly.
    pub fn set_cache_size(&mut self, cache_size: usize) {
        self.cache_size = cache_size;
    }

    /// Addresses currently in the store, unordered.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.associations.keys().copied()
    }

    /// The eviction queue, for introspection.
    pub fn queue(&self) -> &EvictionQueue {
        &self.queue
    }

    /// The most recent `n` eviction events in chronological order.
    pub fn recent_evictions(&self, n: usize) -> Vec<EvictionEvent> {
        self.eviction_log.recent(n)
    }

    /// Run one eviction pass.
    ///
    /// Selects associations from the idle end of the queue until their
    /// cumulative resolution count covers the overage, removes the
    /// lowest-scoring resolutions among them until the store is back at its
    /// bound, recycles surviving associations to the fresh end, and deletes
    /// emptied ones.
    fn shear(&mut self, now: Seconds) -> Result<EvictionOutcome, AgentError> {
        let overage = self.resolution_count.saturating_sub(self.cache_size);
        if overage == 0 {
            return Ok(EvictionOutcome::default());
        }

        let mut selected: Vec<IpAddr> = Vec::new();
        let mut working_pool = 0usize;
        while working_pool < overage {
            let Some(address) = self.queue.shear(1).pop() else {
                break;
            };
            let count = match self.associations.get(&address) {
                Some(association) => association.resolutions.len(),
                None => {
                    return Err(AgentError::Invariant(format!(
                        "{address} enqueued for eviction but absent from the store"
                    )));
                }
            };
            working_pool += count;
            selected.push(address);
        }

        let scorer = &*self.scorer;
        let mut candidates: Vec<(f64, String, IpAddr)> = Vec::with_capacity(working_pool);
        for address in &selected {
            let association = &self.associations[address];
            for (terminal, resolution) in &association.resolutions {
                candidates.push((scorer.score(resolution, now), terminal.clone(), *address));
            }
        }
        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut removed = Vec::with_capacity(overage.min(candidates.len()));
        for (score, terminal, address) in candidates.into_iter().take(overage) {
            let association = self.associations.get_mut(&address).ok_or_else(|| {
                AgentError::Invariant(format!("{address} vanished mid-eviction"))
            })?;
            association.resolutions.remove(&terminal);
            if association.best.as_deref() == Some(terminal.as_str()) {
                association.best = None;
            }
            self.resolution_count -= 1;
            removed.push(RemovedResolution {
                address,
                terminal,
                score,
            });
        }

        let mut affected: Vec<IpAddr> = removed.iter().map(|r| r.address).collect();
        affected.sort_unstable();
        affected.dedup();

        let mut outcome = EvictionOutcome::default();
        for address in &selected {
            let is_empty = self
                .associations
                .get(address)
                .map(|a| a.resolutions.is_empty())
                .unwrap_or(true);
            if is_empty {
                self.associations.remove(address);
                outcome.deleted.push(*address);
            } else {
                let association = self.associations.get_mut(address).ok_or_else(|| {
                    AgentError::Invariant(format!("{address} vanished mid-eviction"))
                })?;
                association.best = association.select_best(scorer, now).map(|(t, _)| t);
                self.queue.touch(*address);
                outcome.recycled.push(*address);
            }
        }

        let event = EvictionEvent {
            timestamp: now,
            overage,
            target_pool: self.cache_size,
            working_pool,
            selected: selected.len(),
            resolutions_after: self.resolution_count,
            affected,
            recycled: outcome.recycled.clone(),
            deleted: outcome.deleted.clone(),
            removed,
        };
        debug!(
            overage = event.overage,
            selected = event.selected,
            recycled = event.recycled.len(),
            deleted = event.deleted.len(),
            remaining = event.resolutions_after,
            "eviction pass complete"
        );
        metrics::record_eviction(&event);
        self.eviction_log.push(event);

        Ok(outcome)
    }
}

impl std::fmt::Debug for AssociationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationStore")
            .field("associations", &self.associations.len())
            .field("resolutions", &self.resolution_count)
            .field("cache_size", &self.cache_size)
            .finish()
    }
}

fn validate_chain(chain: &[String]) -> Result<(), AgentError> {
    if chain.is_empty() {
        return Err(AgentError::InvalidTelemetry("empty chain".to_string()));
    }
    for name in chain {
        let trimmed = name.strip_suffix('.').unwrap_or(name);
        if trimmed.is_empty() || trimmed.split('.').any(|label| label.is_empty()) {
            return Err(AgentError::InvalidTelemetry(format!(
                "empty label in chain element {name:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, last))
    }

    fn chain(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn store(cache_size: usize) -> AssociationStore {
        AssociationStore::new(cache_size, 0.1, 10)
    }

    #[test]
    fn test_observe_creates_association_and_resolution() {
        let mut store = store(10);
        let outcome = store
            .observe(addr(1), chain(&["www.a.example.", "a.example."]), 0.0)
            .unwrap();
        assert!(outcome.created_association);
        assert!(outcome.created_resolution);
        assert!(outcome.best_changed);
        assert_eq!(store.resolution_count(), 1);
        assert_eq!(store.association_count(), 1);
        assert!(store.queue().contains(&addr(1)));
    }

    #[test]
    fn test_observation_updates_counters_exactly_once() {
        let mut store = store(10);
        store.observe(addr(1), chain(&["a.example."]), 5.0).unwrap();
        store.observe(addr(1), chain(&["a.example."]), 9.0).unwrap();

        let association = store.lookup(&addr(1)).unwrap();
        let resolution = &association.resolutions()["a.example."];
        assert_eq!(resolution.query_count, 2);
        assert_eq!(resolution.first_seen, 5.0);
        assert_eq!(resolution.last_seen, 9.0);
        // First post-seed update folds in the gap from first_seen.
        assert!((resolution.trend - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_same_timestamp_observations_are_not_deduplicated() {
        let mut store = store(10);
        store.observe(addr(1), chain(&["a.example."]), 7.0).unwrap();
        store.observe(addr(1), chain(&["a.example."]), 7.0).unwrap();
        store.observe(addr(1), chain(&["a.example."]), 7.0).unwrap();

        let resolution = &store.lookup(&addr(1)).unwrap().resolutions()["a.example."];
        assert_eq!(resolution.query_count, 3);
        assert_eq!(resolution.trend, 0.0);
    }

    #[test]
    fn test_empty_chain_rejected_without_side_effects() {
        let mut store = store(10);
        let err = store.observe(addr(1), vec![], 0.0).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTelemetry(_)));
        assert_eq!(store.association_count(), 0);
        assert_eq!(store.resolution_count(), 0);
    }

    #[test]
    fn test_empty_label_rejected() {
        let mut store = store(10);
        let err = store
            .observe(addr(1), chain(&["www..example."]), 0.0)
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTelemetry(_)));
    }

    #[test]
    fn test_best_prefers_deeper_chain_with_shorter_terminal() {
        let mut store = store(10);
        store
            .observe(addr(1), chain(&["www.a.example.", "a.example."]), 0.0)
            .unwrap();
        store.observe(addr(1), chain(&["b.example."]), 0.0).unwrap();

        let (terminal, score) = store.best(&addr(1), 0.0).unwrap();
        assert_eq!(terminal, "a.example.");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_heavy_query_count_flips_best() {
        let mut store = store(10);
        store
            .observe(addr(1), chain(&["www.a.example.", "a.example."]), 0.0)
            .unwrap();
        store.observe(addr(1), chain(&["b.example."]), 0.0).unwrap();

        let mut t = 0.0;
        for _ in 0..1000 {
            t += 0.06;
            store.observe(addr(1), chain(&["b.example."]), t).unwrap();
        }
        let (terminal, _) = store.best(&addr(1), t).unwrap();
        assert_eq!(terminal, "b.example.");
    }

    #[test]
    fn test_best_ties_break_lexicographically() {
        let mut store = store(10);
        store.observe(addr(1), chain(&["b.example."]), 0.0).unwrap();
        store.observe(addr(1), chain(&["a.example."]), 0.0).unwrap();
        let (terminal, _) = store.best(&addr(1), 0.0).unwrap();
        assert_eq!(terminal, "a.example.");
    }

    #[test]
    fn test_reloaded_resolution_not_best_when_live_exists() {
        let mut store = store(10);
        store
            .seed_reloaded(addr(1), "old.example.".to_string(), -900.0, -300.0, 5.0, 0.0)
            .unwrap();
        store.observe(addr(1), chain(&["new.example."]), 0.0).unwrap();

        let (terminal, _) = store.best(&addr(1), 0.0).unwrap();
        assert_eq!(terminal, "new.example.");
    }

    #[test]
    fn test_reloaded_resolution_best_when_alone() {
        let mut store = store(10);
        store
            .seed_reloaded(addr(1), "old.example.".to_string(), -900.0, -300.0, 5.0, 0.0)
            .unwrap();
        let (terminal, _) = store.best(&addr(1), 0.0).unwrap();
        assert_eq!(terminal, "old.example.");
    }

    #[test]
    fn test_live_observation_merges_reload_placeholder() {
        let mut store = store(10);
        store
            .seed_reloaded(addr(1), "a.example.".to_string(), 100.0, 200.0, 5.0, 300.0)
            .unwrap();
        store
            .observe(addr(1), chain(&["www.a.example.", "a.example."]), 300.0)
            .unwrap();

        let resolution = &store.lookup(&addr(1)).unwrap().resolutions()["a.example."];
        assert!(!resolution.is_reloaded());
        assert_eq!(resolution.chain().len(), 2);
        assert_eq!(resolution.first_seen, 100.0);
        assert_eq!(resolution.query_count, 2);
        assert_eq!(store.resolution_count(), 1);
    }

    #[test]
    fn test_eviction_removes_idle_head_address() {
        let mut store = store(2);
        store.observe(addr(1), chain(&["a.example."]), 0.0).unwrap();
        store.observe(addr(2), chain(&["b.example."]), 1.0).unwrap();
        let outcome = store.observe(addr(3), chain(&["c.example."]), 2.0).unwrap();

        let eviction = outcome.eviction.expect("eviction pass expected");
        assert_eq!(eviction.deleted, vec![addr(1)]);
        assert!(eviction.recycled.is_empty());
        assert!(store.lookup(&addr(1)).is_none());
        assert!(!store.queue().contains(&addr(1)));
        assert_eq!(store.resolution_count(), 2);

        let events = store.recent_evictions(1);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.overage, 1);
        assert_eq!(event.selected, 1);
        assert_eq!(event.deleted, vec![addr(1)]);
        assert!(event.recycled.is_empty());
        assert_eq!(event.removed.len(), 1);
        assert_eq!(event.removed[0].terminal, "a.example.");
    }

    #[test]
    fn test_eviction_recycles_surviving_association() {
        let mut store = store(1);
        store.observe(addr(1), chain(&["x.example."]), 0.0).unwrap();
        let outcome = store.observe(addr(1), chain(&["y.example."]), 1.0).unwrap();

        let eviction = outcome.eviction.expect("eviction pass expected");
        assert_eq!(eviction.recycled, vec![addr(1)]);
        assert!(eviction.deleted.is_empty());
        assert_eq!(store.resolution_count(), 1);
        assert!(store.queue().contains(&addr(1)));
        // The lexicographically-first of the tied resolutions went first.
        let association = store.lookup(&addr(1)).unwrap();
        assert!(association.resolutions().contains_key("y.example."));
        assert!(!association.resolutions().contains_key("x.example."));
    }

    #[test]
    fn test_cache_size_zero_evicts_every_insert() {
        let mut store = store(0);
        let outcome = store.observe(addr(1), chain(&["a.example."]), 0.0).unwrap();
        let eviction = outcome.eviction.expect("eviction pass expected");
        assert_eq!(eviction.deleted, vec![addr(1)]);
        assert_eq!(store.resolution_count(), 0);
        assert_eq!(store.association_count(), 0);
    }

    #[test]
    fn test_reobserved_address_gets_fresh_first_seen() {
        let mut store = store(1);
        store.observe(addr(1), chain(&["a.example."]), 0.0).unwrap();
        // Push it out.
        store.observe(addr(2), chain(&["b.example."]), 1.0).unwrap();
        assert!(store.lookup(&addr(1)).is_none());

        store.observe(addr(1), chain(&["a.example."]), 50.0).unwrap();
        let resolution = &store.lookup(&addr(1)).unwrap().resolutions()["a.example."];
        assert_eq!(resolution.first_seen, 50.0);
        assert_eq!(resolution.query_count, 1);
    }

    #[test]
    fn test_best_cleared_when_resolution_evicted() {
        let mut store = store(1);
        store.observe(addr(1), chain(&["x.example."]), 0.0).unwrap();
        store.observe(addr(1), chain(&["y.example."]), 1.0).unwrap();
        // Cached best must point at a resolution that still exists.
        let association = store.lookup(&addr(1)).unwrap();
        if let Some(best) = association.best_terminal() {
            assert!(association.resolutions().contains_key(best));
        }
    }

    #[test]
    fn test_queue_membership_matches_store() {
        let mut store = store(3);
        for i in 1..=6 {
            store
                .observe(addr(i), chain(&[&format!("host{i}.example.")]), i as f64)
                .unwrap();
        }
        for address in store.addresses().collect::<Vec<_>>() {
            assert!(store.queue().contains(&address));
        }
        assert_eq!(store.queue().len(), store.association_count());
    }

    #[test]
    fn test_eviction_log_is_bounded() {
        let mut store = AssociationStore::new(1, 0.1, 2);
        for i in 1..=5 {
            store
                .observe(addr(i), chain(&[&format!("host{i}.example.")]), i as f64)
                .unwrap();
        }
        assert_eq!(store.recent_evictions(100).len(), 2);
    }
}
