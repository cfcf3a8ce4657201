//! The zone view: an in-memory mirror of the RPZ as published.
//!
//! Populated once at startup from the zone master file, then advanced only
//! when a refresh batch commits successfully. The view never issues DNS
//! queries of its own; when updates fail, it simply falls behind the
//! telemetry view and the drift shows up in the `a2z` cross-check.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::txt::Parser;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::metrics;
use crate::store::{AssociationStore, Resolution, Seconds};

/// Reverse-lookup owner form of an address, without a zone suffix:
/// `5.66.2.10.in-addr.arpa` or the nibble-expanded `ip6.arpa` equivalent.
pub fn reverse_name(address: &IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let value = u128::from(*v6);
            let mut labels = Vec::with_capacity(32);
            for i in 0..32 {
                labels.push(format!("{:x}", (value >> (i * 4)) & 0xf));
            }
            format!("{}.ip6.arpa", labels.join("."))
        }
    }
}

/// Parse a reverse-lookup owner back into an address. Rejects malformed
/// and non-canonical forms (wrong label count, leading zeros, multi-nibble
/// labels).
pub fn parse_reverse_name(name: &str) -> Option<IpAddr> {
    let name = name.trim_end_matches('.');
    if let Some(stem) = name.strip_suffix(".in-addr.arpa") {
        let labels: Vec<&str> = stem.split('.').collect();
        if labels.len() != 4 {
            return None;
        }
        let mut octets = [0u8; 4];
        for (i, label) in labels.iter().rev().enumerate() {
            if label.is_empty() || (label.len() > 1 && label.starts_with('0')) {
                return None;
            }
            octets[i] = label.parse().ok()?;
        }
        Some(IpAddr::V4(Ipv4Addr::from(octets)))
    } else if let Some(stem) = name.strip_suffix(".ip6.arpa") {
        let labels: Vec<&str> = stem.split('.').collect();
        if labels.len() != 32 {
            return None;
        }
        let mut value: u128 = 0;
        for label in labels.iter().rev() {
            if label.len() != 1 {
                return None;
            }
            let nibble = u128::from_str_radix(label, 16).ok()?;
            value = (value << 4) | nibble;
        }
        Some(IpAddr::V6(Ipv6Addr::from(value)))
    } else {
        None
    }
}

/// Full owner name of an address inside the zone:
/// `<reverse-form>.<zone>.`.
pub fn reverse_owner(address: &IpAddr, zone: &Name) -> Result<Name, AgentError> {
    let apex = zone.to_ascii();
    let owner = format!("{}.{}.", reverse_name(address), apex.trim_end_matches('.'));
    Ok(Name::from_ascii(&owner)?)
}

/// Metadata published in the TXT record that accompanies each PTR.
///
/// `first` and `last` are seconds relative to `update` and are never
/// positive: a resolution was seen at or before the moment it was
/// published. `update` is absolute UNIX seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxtMetadata {
    /// First-seen delta from `update`, in seconds (<= 0).
    pub first: Seconds,
    /// Last-seen delta from `update`, in seconds (<= 0).
    pub last: Seconds,
    /// Absolute UNIX seconds of the publication.
    pub update: Seconds,
    /// Heuristic score at publication time.
    pub score: f64,
}

impl TxtMetadata {
    /// Build metadata for a resolution being published at `now`.
    pub fn for_resolution(resolution: &Resolution, score: f64, now: Seconds) -> Self {
        Self {
            first: resolution.first_seen - now,
            last: resolution.last_seen - now,
            update: now,
            score,
        }
    }

    /// Absolute first-seen time.
    pub fn first_seen_abs(&self) -> Seconds {
        self.update + self.first
    }

    /// Absolute last-seen time.
    pub fn last_seen_abs(&self) -> Seconds {
        self.update + self.last
    }

    /// Render as the published TXT payload.
    pub fn to_txt(&self) -> String {
        format!(
            "first={:.3};last={:.3};update={:.3};score={:.3}",
            self.first, self.last, self.update, self.score
        )
    }

    /// Parse a published TXT payload. All four keys must be present.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut first = None;
        let mut last = None;
        let mut update = None;
        let mut score = None;
        for pair in payload.split(';') {
            let (key, value) = pair.split_once('=')?;
            let value: f64 = value.trim().parse().ok()?;
            match key.trim() {
                "first" => first = Some(value),
                "last" => last = Some(value),
                "update" => update = Some(value),
                "score" => score = Some(value),
                _ => {}
            }
        }
        Some(Self {
            first: first?,
            last: last?,
            update: update?,
            score: score?,
        })
    }
}

/// What the zone is believed to publish for one address.
#[derive(Debug, Clone)]
pub struct ZoneEntry {
    /// PTR target: the terminal name last committed for this address.
    pub ptr: String,
    /// Metadata committed alongside, when known.
    pub metadata: Option<TxtMetadata>,
    /// When this entry was last written (or read from the zone file).
    pub updated_at: Seconds,
}

/// In-memory mirror of the RPZ, keyed by address.
#[derive(Debug, Default)]
pub struct ZoneView {
    entries: BTreeMap<IpAddr, ZoneEntry>,
}

impl ZoneView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `address`, if the zone is believed to publish one.
    pub fn get(&self, address: &IpAddr) -> Option<&ZoneEntry> {
        self.entries.get(address)
    }

    /// Record a committed (or reloaded) entry.
    pub fn insert(&mut self, address: IpAddr, entry: ZoneEntry) {
        self.entries.insert(address, entry);
    }

    /// Drop the entry for `address` after its deletion committed.
    pub fn remove(&mut self, address: &IpAddr) {
        self.entries.remove(address);
    }

    /// Number of published addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is published.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published addresses in sorted order.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.entries.keys().copied()
    }
}

/// Result of the startup zone read.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZoneReloadStats {
    /// Addresses seeded into the view and the store.
    pub seeded: usize,
    /// Records that did not belong in the zone.
    pub garbage: usize,
}

/// Read the zone master file and seed both views.
///
/// PTR records whose owner is a well-formed reverse name under the zone
/// apex populate the zone view and seed a reload placeholder in the store;
/// their TXT metadata restores the original timestamps when present. The
/// apex SOA and NS records are expected and skipped. Everything else is
/// garbage: logged (unless suppressed), counted, and otherwise ignored.
pub fn load_zone_file(
    path: &Path,
    zone: &Name,
    view: &mut ZoneView,
    store: &mut AssociationStore,
    log_garbage: bool,
    now: Seconds,
) -> Result<ZoneReloadStats, AgentError> {
    let text = std::fs::read_to_string(path)?;
    let mut parser = Parser::new(text, Some(path.to_path_buf()), Some(zone.clone()));
    let (_, records) = parser
        .parse()
        .map_err(|e| AgentError::ZoneReload(e.to_string()))?;

    let apex = zone.to_ascii().trim_end_matches('.').to_lowercase();
    let suffix = format!(".{apex}");

    let mut stats = ZoneReloadStats::default();
    let mut pending: BTreeMap<IpAddr, (Option<String>, Option<TxtMetadata>)> = BTreeMap::new();
    let garbage = |owner: &str, rtype: RecordType, stats: &mut ZoneReloadStats| {
        stats.garbage += 1;
        metrics::record_zone_garbage();
        if log_garbage {
            warn!(owner, rtype = %rtype, "unexpected record in zone on load");
        }
    };

    for (_, rrset) in records.iter() {
        let owner = rrset.name().to_ascii().to_lowercase();
        let owner = owner.trim_end_matches('.');
        let rtype = rrset.record_type();

        if owner == apex {
            if matches!(rtype, RecordType::SOA | RecordType::NS) {
                continue;
            }
            garbage(owner, rtype, &mut stats);
            continue;
        }

        let Some(stem) = owner.strip_suffix(suffix.as_str()) else {
            garbage(owner, rtype, &mut stats);
            continue;
        };
        let Some(address) = parse_reverse_name(stem) else {
            garbage(owner, rtype, &mut stats);
            continue;
        };

        match rtype {
            RecordType::PTR => {
                for record in rrset.records_without_rrsigs() {
                    if let RData::PTR(ptr) = record.data() {
                        let target = ptr.0.to_ascii().to_lowercase();
                        pending.entry(address).or_default().0 = Some(target);
                    }
                }
            }
            RecordType::TXT => {
                for record in rrset.records_without_rrsigs() {
                    if let RData::TXT(txt) = record.data() {
                        let payload: String = txt
                            .txt_data()
                            .iter()
                            .map(|part| String::from_utf8_lossy(part).into_owned())
                            .collect();
                        if let Some(metadata) = TxtMetadata::parse(&payload) {
                            pending.entry(address).or_default().1 = Some(metadata);
                        }
                    }
                }
            }
            _ => garbage(owner, rtype, &mut stats),
        }
    }

    for (address, (ptr, metadata)) in pending {
        let Some(ptr) = ptr else {
            debug!(%address, "TXT without PTR in zone, skipping");
            continue;
        };
        let (first_seen, last_seen, score) = match &metadata {
            Some(m) => (m.first_seen_abs(), m.last_seen_abs(), m.score),
            None => (now, now, 0.0),
        };
        view.insert(
            address,
            ZoneEntry {
                ptr: ptr.clone(),
                metadata,
                updated_at: metadata.map(|m| m.update).unwrap_or(now),
            },
        );
        store.seed_reloaded(address, ptr, first_seen, last_seen, score, now)?;
        stats.seeded += 1;
    }

    Ok(stats)
}
