//! Metric registrations.
//!
//! The host installs the `metrics` recorder; this crate only describes and
//! increments counters.

use std::sync::Once;

use metrics::{Unit, describe_counter};

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Describe this crate's metrics. Called from resolver construction; safe
/// to call repeatedly.
pub(crate) fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "persisted_documents_l1_hit_total",
            Unit::Count,
            "Resolutions served from the in-process cache."
        );
        describe_counter!(
            "persisted_documents_l1_miss_total",
            Unit::Count,
            "In-process cache lookups that continued down the chain."
        );
        describe_counter!(
            "persisted_documents_l2_hit_total",
            Unit::Count,
            "Resolutions served from the distributed cache."
        );
        describe_counter!(
            "persisted_documents_l2_miss_total",
            Unit::Count,
            "Distributed cache lookups that fell through to the origin."
        );
        describe_counter!(
            "persisted_documents_l2_error_total",
            Unit::Count,
            "Distributed cache reads or writes that failed (always absorbed)."
        );
        describe_counter!(
            "persisted_documents_origin_fetch_total",
            Unit::Count,
            "Origin fetch chains by outcome (found, not_found, error)."
        );
        describe_counter!(
            "persisted_documents_dedup_join_total",
            Unit::Count,
            "Callers that joined an already-running resolution."
        );
        describe_counter!(
            "persisted_documents_breaker_open_total",
            Unit::Count,
            "Circuit breaker trips across all endpoints."
        );
    });
}
