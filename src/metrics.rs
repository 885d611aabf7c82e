//! Metrics for the token lifecycle
//!
//! Every lifecycle operation reports through the `metrics` facade. Nothing
//! is exported unless a recorder is installed, so these calls are free in
//! tests and in library use without the `prometheus` feature.
//!
//! # Metrics
//!
//! - `identity_sign_in_total`: Counter of sign-in attempts by outcome
//!   (`signed_in`, `rejected`, `error`, `cancelled`)
//! - `identity_renewal_total`: Counter of renewals by outcome
//!   (`renewed`, `rejected`, `error`, `cancelled`)
//! - `identity_sign_out_total`: Counter of completed sign-outs
//! - `identity_sign_out_degraded_total`: Counter of sign-outs that skipped
//!   revocation, by stage (`discovery`, `revoke`, `no_refresh_token`,
//!   `store_read`, `cancelled`)
//! - `identity_discovery_cache_total`: Counter of discovery lookups by
//!   result (`hit`, `miss`)
//! - `identity_operation_duration_seconds`: Histogram of operation latency
//!
//! # Examples
//!
//! ```
//! use oidc_session::metrics::OperationTimer;
//!
//! let timer = OperationTimer::start("sign_in");
//! timer.finish("signed_in");
//! ```

use metrics::{histogram, increment_counter};
use std::time::Instant;

/// Times one lifecycle operation and records its outcome.
///
/// Dropping the timer without calling [`finish`](Self::finish) records the
/// outcome `abandoned`, which covers early returns through `?`.
#[derive(Debug)]
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
    recorded: bool,
}

impl OperationTimer {
    /// Starts timing `operation` (`sign_in`, `renew` or `sign_out`).
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
            recorded: false,
        }
    }

    /// Records the outcome counter and latency histogram.
    pub fn finish(mut self, outcome: &'static str) {
        self.record(outcome);
    }

    /// Operation name this timer reports under.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Time elapsed since the timer started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    fn record(&mut self, outcome: &'static str) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        histogram!(
            "identity_operation_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "operation" => self.operation
        );

        match self.operation {
            "sign_in" => increment_counter!("identity_sign_in_total", "outcome" => outcome),
            "renew" => increment_counter!("identity_renewal_total", "outcome" => outcome),
            "sign_out" if outcome == "signed_out" => {
                increment_counter!("identity_sign_out_total")
            }
            _ => {}
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.record("abandoned");
    }
}

/// Records a sign-out that could not revoke the refresh token.
pub fn record_sign_out_degraded(stage: &'static str) {
    increment_counter!("identity_sign_out_degraded_total", "stage" => stage);
}

/// Records a discovery cache lookup.
pub fn record_discovery_cache(result: &'static str) {
    increment_counter!("identity_discovery_cache_total", "result" => result);
}

/// Initializes the metrics exporter for Prometheus
///
/// With the `prometheus` feature this installs the Prometheus exporter
/// (listening on its default `0.0.0.0:9000`). Without it this is a no-op.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
