//! Time-bucketed token accounting.
//!
//! Every count lands in the bucket `floor(now_millis / width)` for the
//! current [`Granularity`]. Input and output tables are independent, each
//! behind its own mutex. A table is a ring of [`BUCKET_WINDOW`] slots, so
//! memory stays bounded between prunes and windowed queries reach back at
//! most [`BUCKET_WINDOW`] buckets.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::counter::{BpeTokenCounter, TokenCounter, flatten_messages};
use super::store::{UsageStore, UsageStoreError, UsageTable};
use crate::Message;

/// Buckets older than `current - RETENTION_BUCKETS` are pruned.
pub const RETENTION_BUCKETS: i64 = 30;
/// Slots per table: the retained window plus the current bucket.
pub const BUCKET_WINDOW: usize = RETENTION_BUCKETS as usize + 1;

/// Store table names.
pub const INPUT_TABLE: &str = "tokens_in";
pub const OUTPUT_TABLE: &str = "tokens_out";

// ── Granularity ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Minute,
    Hour,
    Day,
    Week,
    /// Fixed 30 days.
    Month,
}

impl Granularity {
    pub fn width_millis(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Granularity::Minute => MINUTE,
            Granularity::Hour => 60 * MINUTE,
            Granularity::Day => 24 * 60 * MINUTE,
            Granularity::Week => 7 * 24 * 60 * MINUTE,
            Granularity::Month => 30 * 24 * 60 * MINUTE,
        }
    }

    pub fn bucket_key(self, millis: i64) -> i64 {
        millis.div_euclid(self.width_millis())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        })
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(format!(
                "unknown granularity '{other}' (expected minute, hour, day, week, or month)"
            )),
        }
    }
}

/// Which table a count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Tokens sent to the model.
    Input,
    /// Tokens received from the model.
    Output,
}

// ── BucketRing ─────────────────────────────────────────────────────

/// Fixed ring of `(key, count)` slots indexed by `key mod BUCKET_WINDOW`.
#[derive(Debug, Clone, Default)]
pub struct BucketRing {
    slots: [Option<(i64, u64)>; BUCKET_WINDOW],
}

impl BucketRing {
    fn index(key: i64) -> usize {
        key.rem_euclid(BUCKET_WINDOW as i64) as usize
    }

    /// Add `count` to `key`. A slot holding a different key is taken over.
    pub fn add(&mut self, key: i64, count: u64) {
        let slot = &mut self.slots[Self::index(key)];
        match slot {
            Some((k, c)) if *k == key => *c = c.saturating_add(count),
            _ => *slot = Some((key, count)),
        }
    }

    pub fn get(&self, key: i64) -> u64 {
        match self.slots[Self::index(key)] {
            Some((k, c)) if k == key => c,
            _ => 0,
        }
    }

    /// Sum of every stored key in `from..=to`.
    pub fn sum(&self, from: i64, to: i64) -> u64 {
        self.slots
            .iter()
            .flatten()
            .filter(|(k, _)| (from..=to).contains(k))
            .map(|(_, c)| *c)
            .sum()
    }

    /// Drop keys below `cutoff`. Returns how many were removed.
    pub fn prune_below(&mut self, cutoff: i64) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if matches!(slot, Some((k, _)) if *k < cutoff) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export(&self) -> UsageTable {
        self.slots
            .iter()
            .flatten()
            .map(|(k, c)| (k.to_string(), *c))
            .collect()
    }

    /// Replace contents with `table`. Unparseable keys are skipped; when two
    /// keys share a slot the newer one wins.
    pub fn import(table: &UsageTable) -> Self {
        let mut ring = Self::default();
        for (key, count) in table {
            let Ok(key) = key.parse::<i64>() else {
                warn!("Skipping usage bucket with non-numeric key '{key}'");
                continue;
            };
            let slot = &mut ring.slots[Self::index(key)];
            match slot {
                Some((k, _)) if *k > key => {}
                _ => *slot = Some((key, *count)),
            }
        }
        ring
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Both tables in exported form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input: UsageTable,
    pub output: UsageTable,
}

// ── TokenUsageMeter ────────────────────────────────────────────────

/// Counts tokens of model exchanges into time buckets.
///
/// # Example
///
/// ```ignore
/// let meter = TokenUsageMeter::new().with_granularity(Granularity::Hour);
/// meter.record_input(&[Message::user("explain this function")]);
/// meter.record_output("It parses the header.");
/// let last_day = meter.usage_over_last_n(Direction::Input, 24);
/// ```
pub struct TokenUsageMeter {
    counter: Box<dyn TokenCounter>,
    clock: Arc<dyn Clock>,
    granularity: Mutex<Granularity>,
    input: Mutex<BucketRing>,
    output: Mutex<BucketRing>,
}

impl fmt::Debug for TokenUsageMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenUsageMeter")
            .field("granularity", &self.granularity())
            .field("input_buckets", &lock(&self.input).len())
            .field("output_buckets", &lock(&self.output).len())
            .finish()
    }
}

impl Default for TokenUsageMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenUsageMeter {
    /// `cl100k_base` counting, system clock, minute buckets.
    pub fn new() -> Self {
        Self::from_counter(BpeTokenCounter::cl100k())
    }

    /// Count with `counter` instead of `cl100k_base`.
    pub fn from_counter(counter: impl TokenCounter + 'static) -> Self {
        Self {
            counter: Box::new(counter),
            clock: Arc::new(SystemClock),
            granularity: Mutex::new(Granularity::default()),
            input: Mutex::new(BucketRing::default()),
            output: Mutex::new(BucketRing::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_granularity(self, granularity: Granularity) -> Self {
        self.set_granularity(granularity);
        self
    }

    pub fn granularity(&self) -> Granularity {
        *lock(&self.granularity)
    }

    /// Change the bucket width. Existing keys are not migrated.
    pub fn set_granularity(&self, granularity: Granularity) {
        let mut current = lock(&self.granularity);
        if *current != granularity {
            debug!("Token usage granularity {} -> {granularity}", *current);
            *current = granularity;
        }
    }

    fn current_key(&self) -> i64 {
        self.granularity().bucket_key(self.clock.now_millis())
    }

    fn table(&self, direction: Direction) -> &Mutex<BucketRing> {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    /// Count an outgoing exchange as one flattened text. Returns the count.
    pub fn record_input(&self, messages: &[Message]) -> u64 {
        let tokens = self.counter.count(&flatten_messages(messages));
        self.record(Direction::Input, tokens);
        tokens
    }

    /// Count a model response. Returns the count.
    pub fn record_output(&self, text: &str) -> u64 {
        let tokens = self.counter.count(text);
        self.record(Direction::Output, tokens);
        tokens
    }

    /// Add `tokens` to the current bucket of `direction`.
    pub fn record(&self, direction: Direction, tokens: u64) {
        let key = self.current_key();
        lock(self.table(direction)).add(key, tokens);
        trace!("Recorded {tokens} {direction:?} tokens in bucket {key}");
    }

    /// Sum of the last `n` buckets, current included. Zero when `n == 0`.
    ///
    /// Only [`BUCKET_WINDOW`] buckets are held, so a larger `n` is clamped
    /// to that.
    pub fn usage_over_last_n(&self, direction: Direction, n: u32) -> u64 {
        if n == 0 {
            return 0;
        }
        let n = if n as usize > BUCKET_WINDOW {
            warn!("Usage window of {n} buckets clamped to {BUCKET_WINDOW}");
            BUCKET_WINDOW as u32
        } else {
            n
        };
        let current = self.current_key();
        let from = current - (i64::from(n) - 1);
        lock(self.table(direction)).sum(from, current)
    }

    /// Drop buckets older than [`RETENTION_BUCKETS`] from both tables.
    pub fn prune_old(&self) {
        let cutoff = self.current_key() - RETENTION_BUCKETS;
        let removed =
            lock(&self.input).prune_below(cutoff) + lock(&self.output).prune_below(cutoff);
        if removed > 0 {
            debug!("Pruned {removed} token usage bucket(s) below {cutoff}");
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            input: lock(&self.input).export(),
            output: lock(&self.output).export(),
        }
    }

    /// Replace both tables with `snapshot`.
    pub fn restore(&self, snapshot: &UsageSnapshot) {
        *lock(&self.input) = BucketRing::import(&snapshot.input);
        *lock(&self.output) = BucketRing::import(&snapshot.output);
    }

    /// Write both tables to `store`.
    pub fn persist(&self, store: &dyn UsageStore) -> Result<(), UsageStoreError> {
        let snapshot = self.snapshot();
        store.save(INPUT_TABLE, &snapshot.input)?;
        store.save(OUTPUT_TABLE, &snapshot.output)?;
        Ok(())
    }

    /// Replace both tables with what `store` holds.
    pub fn load(&self, store: &dyn UsageStore) -> Result<(), UsageStoreError> {
        let snapshot = UsageSnapshot {
            input: store.load(INPUT_TABLE)?,
            output: store.load(OUTPUT_TABLE)?,
        };
        self.restore(&snapshot);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::clock::ManualClock;
    use crate::usage::store::MemoryUsageStore;

    /// One token per character.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> u64 {
            text.chars().count() as u64
        }
    }

    const MINUTE: i64 = 60_000;

    fn meter() -> (Arc<ManualClock>, TokenUsageMeter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let meter = TokenUsageMeter::from_counter(CharCounter).with_clock(clock.clone());
        (clock, meter)
    }

    #[test]
    fn widths_are_fixed() {
        assert_eq!(Granularity::Hour.width_millis(), 3_600_000);
        assert_eq!(Granularity::Month.width_millis(), 30 * 86_400_000);
        assert_eq!(Granularity::Minute.bucket_key(-1), -1);
    }

    #[test]
    fn granularity_parses_case_insensitively() {
        assert_eq!("Week".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("fortnight".parse::<Granularity>().is_err());
    }

    #[test]
    fn recorded_tokens_show_in_current_bucket() {
        let (_clock, meter) = meter();
        meter.record(Direction::Input, 10);
        assert_eq!(meter.usage_over_last_n(Direction::Input, 1), 10);
        assert_eq!(meter.usage_over_last_n(Direction::Output, 1), 0);
        assert_eq!(meter.usage_over_last_n(Direction::Input, 0), 0);
    }

    #[test]
    fn record_input_flattens_messages() {
        let (_clock, meter) = meter();
        // "user:hi\n" is 8 chars.
        assert_eq!(meter.record_input(&[Message::user("hi")]), 8);
        assert_eq!(meter.record_output("abc"), 3);
        assert_eq!(meter.usage_over_last_n(Direction::Input, 1), 8);
        assert_eq!(meter.usage_over_last_n(Direction::Output, 1), 3);
    }

    #[test]
    fn window_sums_only_recent_buckets() {
        let (clock, meter) = meter();
        meter.record(Direction::Output, 1);
        clock.advance(MINUTE);
        meter.record(Direction::Output, 2);
        clock.advance(MINUTE);
        meter.record(Direction::Output, 4);

        assert_eq!(meter.usage_over_last_n(Direction::Output, 1), 4);
        assert_eq!(meter.usage_over_last_n(Direction::Output, 2), 6);
        assert_eq!(meter.usage_over_last_n(Direction::Output, 3), 7);
        assert_eq!(meter.usage_over_last_n(Direction::Output, 100), 7);
    }

    #[test]
    fn window_longer_than_ring_is_clamped() {
        let (clock, meter) = meter();
        meter.record(Direction::Input, 1);
        for _ in 1..60 {
            clock.advance(MINUTE);
            meter.record(Direction::Input, 1);
        }
        let held = meter.usage_over_last_n(Direction::Input, BUCKET_WINDOW as u32);
        assert_eq!(held, BUCKET_WINDOW as u64);
        assert_eq!(meter.usage_over_last_n(Direction::Input, 60), held);
        assert_eq!(meter.usage_over_last_n(Direction::Input, u32::MAX), held);
    }

    #[test]
    fn prune_drops_expired_buckets() {
        let (clock, meter) = meter();
        meter.record(Direction::Input, 10);
        clock.advance(31 * MINUTE);
        meter.prune_old();
        assert!(meter.snapshot().input.is_empty());
        assert_eq!(meter.usage_over_last_n(Direction::Input, 1_000), 0);
    }

    #[test]
    fn prune_keeps_retained_window() {
        let (clock, meter) = meter();
        meter.record(Direction::Input, 10);
        clock.advance(30 * MINUTE);
        meter.prune_old();
        assert_eq!(meter.usage_over_last_n(Direction::Input, 31), 10);
    }

    #[test]
    fn ring_slot_is_reused_by_newer_key() {
        let mut ring = BucketRing::default();
        ring.add(5, 1);
        ring.add(5 + BUCKET_WINDOW as i64, 2);
        assert_eq!(ring.get(5), 0);
        assert_eq!(ring.get(5 + BUCKET_WINDOW as i64), 2);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn granularity_change_does_not_migrate() {
        let (_clock, meter) = meter();
        meter.record(Direction::Input, 10);
        meter.set_granularity(Granularity::Hour);
        assert_eq!(meter.granularity(), Granularity::Hour);
        assert_eq!(meter.usage_over_last_n(Direction::Input, 1), 0);
        // Minute keys are far above the hour key, so pruning leaves them.
        meter.prune_old();
        assert_eq!(meter.snapshot().input.len(), 1);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let (clock, meter) = meter();
        meter.record(Direction::Input, 3);
        meter.record(Direction::Output, 7);
        let snapshot = meter.snapshot();

        let (_, other) = meter_with(clock.clone());
        other.restore(&snapshot);
        assert_eq!(other.snapshot(), snapshot);
        assert_eq!(other.usage_over_last_n(Direction::Output, 1), 7);
    }

    fn meter_with(clock: Arc<ManualClock>) -> (Arc<ManualClock>, TokenUsageMeter) {
        let meter = TokenUsageMeter::from_counter(CharCounter).with_clock(clock.clone());
        (clock, meter)
    }

    #[test]
    fn import_skips_bad_keys_and_prefers_newer() {
        let mut table = UsageTable::new();
        table.insert("abc".into(), 9);
        table.insert("1".into(), 1);
        table.insert((1 + BUCKET_WINDOW as i64).to_string(), 2);
        let ring = BucketRing::import(&table);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.get(1 + BUCKET_WINDOW as i64), 2);
    }

    #[test]
    fn persist_and_load_through_store() {
        let (clock, meter) = meter();
        meter.record(Direction::Input, 12);
        let store = MemoryUsageStore::new();
        meter.persist(&store).unwrap();

        let (_, reloaded) = meter_with(clock);
        reloaded.load(&store).unwrap();
        assert_eq!(reloaded.usage_over_last_n(Direction::Input, 1), 12);
    }

    #[test]
    fn tables_are_independent_under_concurrency() {
        let (_clock, meter) = meter();
        let meter = Arc::new(meter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let meter = meter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        meter.record(Direction::Input, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(meter.usage_over_last_n(Direction::Input, 1), 800);
    }
}
