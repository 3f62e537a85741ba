//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parlor_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "parlor_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Gateway Metrics
    pub static ref GATEWAY_CONNECTIONS: IntGauge = IntGauge::new(
        "parlor_gateway_connections",
        "Current number of live gateway connections"
    ).expect("metric can be created");
    pub static ref GATEWAY_ONLINE_USERS: IntGauge = IntGauge::new(
        "parlor_gateway_online_users",
        "Current number of users with at least one live connection"
    ).expect("metric can be created");
    pub static ref GATEWAY_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parlor_gateway_events_total", "Total number of inbound gateway events"),
        &["event"]
    ).expect("metric can be created");
    pub static ref GATEWAY_BROADCASTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parlor_gateway_broadcasts_total", "Total number of events delivered to connections"),
        &["event"]
    ).expect("metric can be created");
    pub static ref GATEWAY_DROPPED_CONNECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "parlor_gateway_dropped_connections_total",
            "Connections evicted because their outbound queue filled or closed"
        ),
        &["reason"]
    ).expect("metric can be created");

    // Database Metrics
    pub static ref DB_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parlor_db_queries_total", "Total number of database queries"),
        &["operation", "table"]
    ).expect("metric can be created");
    pub static ref DB_QUERY_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "parlor_db_query_duration_seconds",
            "Database query duration in seconds"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation", "table"]
    ).expect("metric can be created");

    // Application Metrics
    pub static ref ROOMS_TOTAL: IntGauge = IntGauge::new(
        "parlor_rooms_total",
        "Total number of rooms"
    ).expect("metric can be created");
    pub static ref MESSAGES_TOTAL: IntGauge = IntGauge::new(
        "parlor_messages_total",
        "Total number of messages"
    ).expect("metric can be created");
    pub static ref MEMBERSHIP_CACHE_ROOMS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("parlor_membership_cache_rooms", "Rooms currently mirrored in the membership cache"),
        &["state"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parlor_errors_total", "Total number of errors"),
        &["kind", "surface"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_CONNECTIONS.clone()))
        .expect("GATEWAY_CONNECTIONS can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_ONLINE_USERS.clone()))
        .expect("GATEWAY_ONLINE_USERS can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_EVENTS_TOTAL.clone()))
        .expect("GATEWAY_EVENTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_BROADCASTS_TOTAL.clone()))
        .expect("GATEWAY_BROADCASTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_DROPPED_CONNECTIONS_TOTAL.clone()))
        .expect("GATEWAY_DROPPED_CONNECTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DB_QUERIES_TOTAL.clone()))
        .expect("DB_QUERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DB_QUERY_DURATION_SECONDS.clone()))
        .expect("DB_QUERY_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ROOMS_TOTAL.clone()))
        .expect("ROOMS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MESSAGES_TOTAL.clone()))
        .expect("MESSAGES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MEMBERSHIP_CACHE_ROOMS.clone()))
        .expect("MEMBERSHIP_CACHE_ROOMS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
