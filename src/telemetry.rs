//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_` and counters end in `_total`.
//!
//! # Common labels
//!
//! - `kind` — fetch hit kind: "exact", "prefix" or "trimmed"
//! - `outcome` — insert outcome: "created" or "refreshed"

/// Total fetches that returned a cached value.
///
/// Labels: `kind` ("exact" | "prefix" | "trimmed").
pub const FETCH_HITS_TOTAL: &str = "muninn_fetch_hits_total";

/// Total fetches that returned nothing usable.
pub const FETCH_MISSES_TOTAL: &str = "muninn_fetch_misses_total";

/// Total insert operations.
///
/// Labels: `outcome` ("created" | "refreshed").
pub const INSERTS_TOTAL: &str = "muninn_inserts_total";

/// Total entries evicted by capacity pressure.
pub const EVICTIONS_TOTAL: &str = "muninn_evictions_total";
