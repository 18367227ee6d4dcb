//! Operational metrics for minting and redemption.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `turnstile_tickets_minted_total` - Tickets written by new mint batches
//! - `turnstile_mint_replays_total` - Mint requests answered from an existing batch
//! - `turnstile_scans_total{outcome}` - Scan attempts by outcome
//! - `turnstile_code_collisions_total` - Mint batches aborted by a redemption code collision
//! - `turnstile_cache_evictions_total{cause}` - Offline cache entries dropped
//!
//! ## Histograms
//! - `turnstile_scan_duration_seconds` - Time spent validating a presented code
//!
//! Nothing is exported unless the process installs a recorder.

use crate::store::ScanOutcomeKind;
use metrics::{describe_counter, describe_histogram};

/// Register descriptions for every metric this crate emits.
///
/// Call once at startup, after installing the recorder.
pub fn register_metrics() {
    describe_counter!(
        "turnstile_tickets_minted_total",
        "Total number of tickets written by new mint batches"
    );
    describe_counter!(
        "turnstile_mint_replays_total",
        "Total number of mint requests answered from an existing batch"
    );
    describe_counter!(
        "turnstile_scans_total",
        "Total number of scan attempts by outcome"
    );
    describe_counter!(
        "turnstile_code_collisions_total",
        "Total number of mint batches aborted by a redemption code collision"
    );
    describe_counter!(
        "turnstile_cache_evictions_total",
        "Total number of offline cache entries dropped by cause (stale, revoked, capacity, manual)"
    );
    describe_histogram!(
        "turnstile_scan_duration_seconds",
        "Time spent validating a presented code"
    );

    tracing::info!("Turnstile metrics registered");
}

/// Record a newly committed mint batch.
pub fn record_minted(tickets: usize) {
    metrics::counter!("turnstile_tickets_minted_total").increment(tickets as u64);
}

/// Record a mint request served from an existing batch.
pub fn record_mint_replay() {
    metrics::counter!("turnstile_mint_replays_total").increment(1);
}

/// Record a redemption code collision.
pub fn record_code_collision() {
    metrics::counter!("turnstile_code_collisions_total").increment(1);
}

/// Record a scan outcome and how long validation took.
pub fn record_scan(outcome: ScanOutcomeKind, duration_secs: f64) {
    metrics::counter!("turnstile_scans_total", "outcome" => outcome.as_str()).increment(1);
    metrics::histogram!("turnstile_scan_duration_seconds").record(duration_secs);
}

/// Record offline cache evictions.
pub fn record_cache_evictions(cause: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!("turnstile_cache_evictions_total", "cause" => cause)
            .increment(count as u64);
    }
}
