use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static LIFECYCLE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "amp_lifecycle_operations_total",
            "provisioning operations against the amp panel by outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("valid lifecycle metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static CALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "amp_callbacks_total",
        "inbound callbacks received from the amp panel",
    ))
    .expect("valid callback metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Count one lifecycle operation; `outcome` is `ok` or an error kind.
pub fn record_operation(operation: &str, outcome: &str) {
    LIFECYCLE_OPERATIONS
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
