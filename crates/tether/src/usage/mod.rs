//! Token usage metering.
//!
//! - [`counter`]: [`TokenCounter`] implementations (`cl100k_base` BPE and a
//!   character-ratio estimate).
//! - [`clock`]: [`Clock`] abstraction over wall-clock time.
//! - [`meter`]: [`TokenUsageMeter`] and its ring-buffer bucket tables.
//! - [`store`]: [`UsageStore`] persistence (in-memory and JSON file).

pub mod clock;
pub mod counter;
pub mod meter;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{BpeTokenCounter, EstimatingTokenCounter, TokenCounter, flatten_messages};
pub use meter::{Direction, Granularity, TokenUsageMeter, UsageSnapshot};
pub use store::{JsonFileUsageStore, MemoryUsageStore, UsageStore, UsageStoreError, UsageTable};
