//! Live/cumulative count reconciliation for one camera.
//!
//! The edge device pushes running totals since its process started (live).
//! Historical totals from before that run (cumulative) come from the store.
//! The displayed figure is always `cumulative + live`; neither side ever
//! replaces the other.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Zones with more than this many people inside are flagged.
pub const HIGH_TRAFFIC_THRESHOLD: i64 = 5;

const ZONE_PREFIX: &str = "zone";
const LINE_PREFIX: &str = "line_";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CountKey {
    Zone(u8),
    Line(String),
}

impl CountKey {
    /// Parse the wire spelling: `zone<N>` or `line_<name>`.
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(name) = key.strip_prefix(LINE_PREFIX) {
            return (!name.is_empty()).then(|| Self::Line(name.to_string()));
        }
        key.strip_prefix(ZONE_PREFIX)
            .and_then(|id| id.parse::<u8>().ok())
            .map(Self::Zone)
    }

    pub fn is_zone(&self) -> bool {
        matches!(self, Self::Zone(_))
    }
}

impl fmt::Display for CountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(id) => write!(f, "{}{}", ZONE_PREFIX, id),
            Self::Line(name) => write!(f, "{}{}", LINE_PREFIX, name),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LiveTally {
    #[serde(rename = "in", default)]
    pub entered: i64,
    #[serde(rename = "out", default)]
    pub exited: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeTotals {
    #[serde(rename = "totalIn", default)]
    pub total_in: i64,
    #[serde(rename = "totalOut", default)]
    pub total_out: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountRecord {
    pub live_in: i64,
    pub live_out: i64,
    pub cumulative_in: i64,
    pub cumulative_out: i64,
    pub last_update: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayedCounts {
    pub entered: i64,
    pub exited: i64,
    /// Only zones have an occupancy; lines report throughput.
    pub occupancy: Option<i64>,
    pub high_traffic: bool,
}

/// Decode a live push. Entries with unknown keys, malformed or negative
/// values are dropped; a payload that is not a JSON object is an error.
pub fn parse_live(payload: &[u8]) -> Result<BTreeMap<CountKey, LiveTally>> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let serde_json::Value::Object(map) = value else {
        return Err(anyhow!("live counts must be a JSON object"));
    };
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let Some(count_key) = CountKey::parse(&key) else {
            log::debug!("dropping live count for unknown key '{}'", key);
            continue;
        };
        match serde_json::from_value::<LiveTally>(value) {
            Ok(tally) if tally.entered < 0 || tally.exited < 0 => {
                log::warn!("dropping negative live count for '{}'", key);
            }
            Ok(tally) => {
                out.insert(count_key, tally);
            }
            Err(e) => log::warn!("dropping malformed live count for '{}': {}", key, e),
        }
    }
    Ok(out)
}

#[derive(Clone, Debug, Default)]
pub struct CountAggregator {
    records: BTreeMap<CountKey, CountRecord>,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite-merge the live figures, creating records on first sight.
    pub fn apply_live(&mut self, live: &BTreeMap<CountKey, LiveTally>, now: Instant) {
        for (key, tally) in live {
            let record = self.records.entry(key.clone()).or_insert(CountRecord {
                live_in: 0,
                live_out: 0,
                cumulative_in: 0,
                cumulative_out: 0,
                last_update: now,
            });
            record.live_in = tally.entered;
            record.live_out = tally.exited;
            record.last_update = now;
        }
    }

    /// Store historical totals on records that already exist.
    pub fn apply_cumulative(&mut self, totals: &BTreeMap<CountKey, CumulativeTotals>) {
        for (key, record) in self.records.iter_mut() {
            if let Some(t) = totals.get(key) {
                record.cumulative_in = t.total_in;
                record.cumulative_out = t.total_out;
            }
        }
    }

    pub fn record(&self, key: &CountKey) -> Option<&CountRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> &BTreeMap<CountKey, CountRecord> {
        &self.records
    }

    pub fn displayed(&self, key: &CountKey) -> Option<DisplayedCounts> {
        let r = self.records.get(key)?;
        let occupancy = key.is_zone().then(|| r.live_in.saturating_sub(r.live_out));
        Some(DisplayedCounts {
            entered: r.cumulative_in.saturating_add(r.live_in),
            exited: r.cumulative_out.saturating_add(r.live_out),
            occupancy,
            high_traffic: occupancy.is_some_and(|o| o > HIGH_TRAFFIC_THRESHOLD),
        })
    }

    pub fn clear(&mut self, key: &CountKey) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(pairs: &[(CountKey, i64, i64)]) -> BTreeMap<CountKey, CumulativeTotals> {
        pairs
            .iter()
            .map(|(k, i, o)| {
                (
                    k.clone(),
                    CumulativeTotals {
                        total_in: *i,
                        total_out: *o,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn extreme_device_counts_are_dropped_or_saturated() {
        let live = parse_live(
            br#"{"zone1":{"in":9223372036854775807,"out":-1},"zone2":{"in":9223372036854775807,"out":0}}"#,
        )
        .unwrap();
        assert!(!live.contains_key(&CountKey::Zone(1)));

        let mut agg = CountAggregator::new();
        agg.apply_live(&live, Instant::now());
        agg.apply_cumulative(&totals(&[(CountKey::Zone(2), i64::MAX, 0)]));
        let shown = agg.displayed(&CountKey::Zone(2)).unwrap();
        assert_eq!(shown.entered, i64::MAX);
        assert_eq!(shown.occupancy, Some(i64::MAX));
        assert!(agg.displayed(&CountKey::Zone(1)).is_none());
    }

    #[test]
    fn keys_round_trip_through_wire_spelling() {
        assert_eq!(CountKey::parse("zone3"), Some(CountKey::Zone(3)));
        assert_eq!(
            CountKey::parse("line_door"),
            Some(CountKey::Line("door".to_string()))
        );
        assert_eq!(CountKey::parse("line_"), None);
        assert_eq!(CountKey::parse("zonex"), None);
        assert_eq!(CountKey::parse("fps"), None);
        assert_eq!(CountKey::Line("exit".to_string()).to_string(), "line_exit");
    }

    #[test]
    fn displayed_is_cumulative_plus_live() {
        let mut agg = CountAggregator::new();
        let live = parse_live(br#"{"zone1":{"in":5,"out":2}}"#).unwrap();
        agg.apply_live(&live, Instant::now());
        agg.apply_cumulative(&totals(&[(CountKey::Zone(1), 40, 10)]));
        let shown = agg.displayed(&CountKey::Zone(1)).unwrap();
        assert_eq!(shown.entered, 45);
        assert_eq!(shown.exited, 12);
        assert_eq!(shown.occupancy, Some(3));
        assert!(!shown.high_traffic);
    }

    #[test]
    fn additive_formula_holds_under_any_interleaving() {
        let mut agg = CountAggregator::new();
        let key = CountKey::Zone(2);
        let now = Instant::now();
        agg.apply_live(&parse_live(br#"{"zone2":{"in":1,"out":0}}"#).unwrap(), now);
        agg.apply_cumulative(&totals(&[(key.clone(), 100, 90)]));
        agg.apply_live(&parse_live(br#"{"zone2":{"in":7,"out":3}}"#).unwrap(), now);
        agg.apply_cumulative(&totals(&[(key.clone(), 101, 92)]));
        agg.apply_live(&parse_live(br#"{"zone2":{"in":8,"out":3}}"#).unwrap(), now);

        let r = *agg.record(&key).unwrap();
        let shown = agg.displayed(&key).unwrap();
        assert_eq!(shown.entered, r.cumulative_in + r.live_in);
        assert_eq!(shown.exited, r.cumulative_out + r.live_out);
        assert_eq!((shown.entered, shown.exited), (109, 95));
    }

    #[test]
    fn lines_never_report_occupancy() {
        let mut agg = CountAggregator::new();
        agg.apply_live(
            &parse_live(br#"{"line_door":{"in":30,"out":1}}"#).unwrap(),
            Instant::now(),
        );
        let shown = agg.displayed(&CountKey::Line("door".to_string())).unwrap();
        assert_eq!(shown.occupancy, None);
        assert!(!shown.high_traffic);
    }

    #[test]
    fn high_traffic_above_threshold() {
        let mut agg = CountAggregator::new();
        let now = Instant::now();
        agg.apply_live(&parse_live(br#"{"zone1":{"in":5,"out":0}}"#).unwrap(), now);
        assert!(!agg.displayed(&CountKey::Zone(1)).unwrap().high_traffic);
        agg.apply_live(&parse_live(br#"{"zone1":{"in":6,"out":0}}"#).unwrap(), now);
        assert!(agg.displayed(&CountKey::Zone(1)).unwrap().high_traffic);
    }

    #[test]
    fn cumulative_only_lands_on_existing_records() {
        let mut agg = CountAggregator::new();
        agg.apply_cumulative(&totals(&[(CountKey::Zone(4), 10, 10)]));
        assert!(agg.is_empty());
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let live = parse_live(br#"{"zone1":{"in":"x"},"fps":12,"zone2":{"in":1,"out":1}}"#).unwrap();
        assert_eq!(live.len(), 1);
        assert!(live.contains_key(&CountKey::Zone(2)));
        assert!(parse_live(b"[1,2]").is_err());
        assert!(parse_live(b"not json").is_err());
    }

    #[test]
    fn clear_removes_single_record() {
        let mut agg = CountAggregator::new();
        agg.apply_live(
            &parse_live(br#"{"zone1":{"in":1,"out":0},"zone2":{"in":1,"out":0}}"#).unwrap(),
            Instant::now(),
        );
        assert!(agg.clear(&CountKey::Zone(1)));
        assert!(!agg.clear(&CountKey::Zone(1)));
        assert_eq!(agg.records().len(), 1);
        agg.clear_all();
        assert!(agg.is_empty());
    }
}
