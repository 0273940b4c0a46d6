//! Prometheus counters and gauges, grouped by subsystem.
//!
//! Everything registers against one shared registry that the gateway's
//! /metrics endpoint gathers from.

use prometheus::{
    register_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, CounterVec, Encoder, IntCounter, IntGauge, Registry,
    TextEncoder,
};

/// Process-wide registry every metric below registers with
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Live session fan-out
pub mod sessions {
    use super::{
        register_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec,
        IntGauge, REGISTRY,
    };

    /// Currently open WebSocket sessions across all users
    pub static ACTIVE_SESSIONS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "ws_sessions_active",
            "Current number of open client sessions",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_SESSIONS")
    });

    /// Users with at least one open session
    pub static CONNECTED_USERS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "ws_users_connected",
            "Current number of users with at least one open session",
            REGISTRY.clone()
        )
        .expect("Failed to register CONNECTED_USERS")
    });

    /// Events delivered to sessions, by event type
    pub static EVENTS_DELIVERED: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "ws_events_delivered_total",
            "Total number of events delivered to client sessions",
            &["event_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_DELIVERED")
    });

    /// Events that could not be handed to a session
    pub static EVENTS_DROPPED: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "ws_events_dropped_total",
            "Total number of events dropped before reaching a session",
            &["reason"],
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_DROPPED")
    });
}

/// Broker bridge
pub mod broker {
    use super::{register_int_counter_with_registry, IntCounter, REGISTRY};

    pub static MESSAGES_PUBLISHED: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "broker_messages_published_total",
                "Total number of messages published to the notification stream",
                REGISTRY.clone()
            )
            .expect("Failed to register MESSAGES_PUBLISHED")
        });

    pub static MESSAGES_CONSUMED: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "broker_messages_consumed_total",
                "Total number of messages handed to the consume-loop handler",
                REGISTRY.clone()
            )
            .expect("Failed to register MESSAGES_CONSUMED")
        });

    pub static HANDLER_ERRORS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "broker_handler_errors_total",
            "Total number of per-message handler failures (skipped, loop continues)",
            REGISTRY.clone()
        )
        .expect("Failed to register HANDLER_ERRORS")
    });

    pub static POLL_ERRORS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "broker_poll_errors_total",
            "Total number of transient consume-loop poll failures",
            REGISTRY.clone()
        )
        .expect("Failed to register POLL_ERRORS")
    });
}

/// Entity cache
pub mod cache {
    use super::{register_counter_vec_with_registry, CounterVec, REGISTRY};

    /// Cache hit counter, by key family
    pub static CACHE_HITS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_hits_total",
            "Cache reads served from Redis, by key family",
            &["family"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_HITS")
    });

    /// Cache miss counter, by key family
    pub static CACHE_MISSES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_misses_total",
            "Cache reads that fell through to the source, by key family",
            &["family"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_MISSES")
    });

    /// Keys cleared by the invalidation policy, by mutating operation
    pub static INVALIDATIONS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_invalidations_total",
            "Total number of cache keys cleared, by mutating operation",
            &["operation"],
            REGISTRY.clone()
        )
        .expect("Failed to register INVALIDATIONS")
    });
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("non-UTF-8 metrics output: {e}")))
}
