//! Metrics registry for the compute backend
//!
//! Provides OpenTelemetry metrics for:
//! - Monitor passes (duration, observed workloads)
//! - Lifecycle side effects (orphans cleaned, jobs expired)
//! - Compilation and submission
//! - Ephemeral port allocation

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};

/// Global meter for compute metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("ucloud-compute"));

// ============================================================================
// Monitor Metrics
// ============================================================================

/// Histogram of monitor pass duration
///
/// Labels:
/// - `result`: success, error
pub static MONITOR_PASS_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("ucloud_monitor_pass_duration_seconds")
        .with_description("Duration of a reconciliation pass in seconds")
        .with_unit("s")
        .build()
});

/// Gauge of workloads observed in the last pass
pub static MONITOR_WORKLOADS: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("ucloud_monitor_workloads")
        .with_description("Workloads observed by the last reconciliation pass")
        .with_unit("{workloads}")
        .build()
});

/// Counter of orphaned workloads handed to cleanup
pub static ORPHANS_CLEANED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ucloud_orphans_cleaned_total")
        .with_description("Workloads deleted because no active job owns them")
        .with_unit("{workloads}")
        .build()
});

/// Counter of jobs stopped for exceeding their time allocation
pub static JOBS_EXPIRED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ucloud_jobs_expired_total")
        .with_description("Jobs stopped because their allocation elapsed")
        .with_unit("{jobs}")
        .build()
});

// ============================================================================
// Compilation Metrics
// ============================================================================

/// Counter of compiled replicas
///
/// Labels:
/// - `result`: success, error
pub static WORKLOADS_COMPILED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ucloud_workloads_compiled_total")
        .with_description("Replica workloads compiled")
        .with_unit("{workloads}")
        .build()
});

// ============================================================================
// Port Allocation Metrics
// ============================================================================

/// Counter of ports handed out
///
/// Labels:
/// - `feature`: ssh, syncthing
pub static PORTS_ALLOCATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ucloud_ports_allocated_total")
        .with_description("Ephemeral ports handed out")
        .with_unit("{ports}")
        .build()
});

/// Counter of allocation attempts against a full range
///
/// Labels:
/// - `feature`: ssh, syncthing
pub static PORT_EXHAUSTION: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ucloud_port_exhaustion_total")
        .with_description("Port allocations that found the range exhausted")
        .with_unit("{attempts}")
        .build()
});

// ============================================================================
// Timers
// ============================================================================

/// Records the duration of a monitor pass when finished
pub struct PassTimer {
    start: Instant,
}

impl PassTimer {
    /// Start timing a pass
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record a successful pass
    pub fn success(self) {
        self.record("success");
    }

    /// Record a failed pass
    pub fn error(self) {
        self.record("error");
    }

    fn record(self, result: &'static str) {
        MONITOR_PASS_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", result)],
        );
    }
}

/// Record one compilation outcome
pub fn record_compilation(success: bool) {
    let result = if success { "success" } else { "error" };
    WORKLOADS_COMPILED.add(1, &[KeyValue::new("result", result)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_provider() {
        // The global meter is a no-op until a provider is installed
        PassTimer::start().success();
        PassTimer::start().error();
        record_compilation(true);
        MONITOR_WORKLOADS.record(3, &[]);
        ORPHANS_CLEANED.add(1, &[]);
    }
}
