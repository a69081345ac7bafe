//! OpenTelemetry metrics for addon controllers
//!
//! Instruments are created lazily from the global meter, so they are no-ops
//! until `telemetry::init_telemetry` installs an OTLP meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("submariner-addon"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: broker, broker-crds, agent, config, gateways, ...
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("submariner_addon_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `controller`: controller name
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("submariner_addon_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of manifest writes
///
/// Labels:
/// - `operation`: created, updated, deleted
pub static MANIFEST_WRITES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("submariner_addon_manifest_writes_total")
        .with_description("Total number of objects written from manifests")
        .with_unit("{objects}")
        .build()
});

/// Counter of cloud environment operations
///
/// Labels:
/// - `platform`: AWS, Azure, GCP, RHOS
/// - `operation`: prepare, cleanup
/// - `result`: success, error
pub static CLOUD_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("submariner_addon_cloud_operations_total")
        .with_description("Total number of cloud environment operations")
        .with_unit("{operations}")
        .build()
});

/// Times a reconcile and records the outcome
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile for `controller`
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record a failure
    pub fn error(self, error: &crate::Error) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "error"),
            ],
        );
        let error_type = if error.is_retryable() {
            "transient"
        } else {
            "permanent"
        };
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("error_type", error_type),
            ],
        );
    }

    /// Record the outcome of `result` and hand it back
    pub fn observe<T>(self, result: crate::Result<T>) -> crate::Result<T> {
        match &result {
            Ok(_) => self.success(),
            Err(e) => self.error(e),
        }
        result
    }
}

/// Record objects written by a manifest apply pass
pub fn record_manifest_writes(created: usize, updated: usize) {
    if created > 0 {
        MANIFEST_WRITES.add(created as u64, &[KeyValue::new("operation", "created")]);
    }
    if updated > 0 {
        MANIFEST_WRITES.add(updated as u64, &[KeyValue::new("operation", "updated")]);
    }
}

/// Record a cloud prepare or cleanup attempt
pub fn record_cloud_operation(platform: &str, operation: &'static str, success: bool) {
    CLOUD_OPERATIONS.add(
        1,
        &[
            KeyValue::new("platform", platform.to_string()),
            KeyValue::new("operation", operation),
            KeyValue::new("result", if success { "success" } else { "error" }),
        ],
    );
}
