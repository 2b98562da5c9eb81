/// Metrics and telemetry for Aurora Agent
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Connection accept/reject counts
/// - Handshake outcomes
/// - Message delivery and observer failures
/// - Resolver cache hit/miss rates
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Connection Metrics ==========

    /// Inbound connections accepted after a successful handshake
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        "agent_connections_accepted_total",
        "Total inbound connections accepted"
    )
    .unwrap();

    /// Inbound attempts rejected, by reason
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "agent_connections_rejected_total",
        "Total inbound connection attempts rejected",
        &["reason"]
    )
    .unwrap();

    /// Outbound connections established
    pub static ref CONNECTIONS_DIALED_TOTAL: IntCounter = register_int_counter!(
        "agent_connections_dialed_total",
        "Total outbound connections established"
    )
    .unwrap();

    /// Connections currently open
    pub static ref CONNECTIONS_OPEN: IntGauge = register_int_gauge!(
        "agent_connections_open",
        "Number of connections currently open"
    )
    .unwrap();

    // ========== Message Metrics ==========

    /// Messages delivered to a message observer
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        "agent_messages_delivered_total",
        "Total messages delivered to observers"
    )
    .unwrap();

    /// Observer invocations that returned an error (delivery isolated)
    pub static ref OBSERVER_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "agent_observer_errors_total",
        "Total observer invocations that failed",
        &["stage"]
    )
    .unwrap();

    // ========== Resolver Metrics ==========

    /// Route cache hits
    pub static ref RESOLVER_CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "agent_resolver_cache_hits_total",
        "Total route cache hits"
    )
    .unwrap();

    /// Route cache misses
    pub static ref RESOLVER_CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "agent_resolver_cache_misses_total",
        "Total route cache misses"
    )
    .unwrap();
}

/// Render all registered metrics in Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
