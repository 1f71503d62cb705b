use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

// --- Dispatch ---

pub static SIGNALS_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_signals_dispatched_total",
        "Signals accepted from the control plane"
    )
    .expect("signals_dispatched counter")
});

pub static DELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_deliveries_total",
        "Signal deliveries that reached a subscriber"
    )
    .expect("deliveries counter")
});

pub static DELIVERY_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_delivery_failures_total",
        "Signal deliveries that failed and led to eviction"
    )
    .expect("delivery_failures counter")
});

pub static EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_evictions_total",
        "Subscribers removed from the registry after a failed delivery"
    )
    .expect("evictions counter")
});

// --- Connections ---

pub static CONNECTED_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "relay_connected_subscribers",
        "Subscribers currently registered"
    )
    .expect("connected_subscribers gauge")
});

pub static SUPERSEDED_CONNECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_superseded_connections_total",
        "Connections replaced by a newer registration of the same subscriber"
    )
    .expect("superseded_connections counter")
});

pub static AUTH_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_auth_rejections_total",
        "Rejected credentials by role (control_plane, subscriber)",
        &["role"]
    )
    .expect("auth_rejections counter")
});

pub fn inc_signals_dispatched() {
    SIGNALS_DISPATCHED.inc();
}

pub fn inc_deliveries(count: u64) {
    DELIVERIES.inc_by(count);
}

pub fn inc_delivery_failures(count: u64) {
    DELIVERY_FAILURES.inc_by(count);
}

pub fn inc_evictions() {
    EVICTIONS.inc();
}

pub fn inc_superseded() {
    SUPERSEDED_CONNECTIONS.inc();
}

pub fn inc_auth_rejection(role: &str) {
    AUTH_REJECTIONS.with_label_values(&[role]).inc();
}
