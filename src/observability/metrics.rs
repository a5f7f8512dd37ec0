use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the wallet ledger.
///
/// Recording is a no-op until a recorder is installed with [`init_metrics`].
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_ledger_operation(&self, operation: &str, currency: &str) {
        counter!("wallet_ledger_operations_total", "operation" => operation.to_string(), "currency" => currency.to_string()).increment(1);
    }

    pub fn record_ledger_failure(&self, operation: &str, kind: &str) {
        counter!("wallet_ledger_failures_total", "operation" => operation.to_string(), "kind" => kind.to_string()).increment(1);
    }

    pub fn record_ledger_latency(&self, operation: &str, duration_ms: f64) {
        histogram!("wallet_ledger_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_cancellation_requested(&self, priority: &str) {
        counter!("wallet_cancellations_requested_total", "priority" => priority.to_string()).increment(1);
    }

    pub fn record_cancellation_resolved(&self, decision: &str, transaction_type: &str) {
        counter!("wallet_cancellations_resolved_total", "decision" => decision.to_string(), "type" => transaction_type.to_string()).increment(1);
    }

    pub fn record_lock_timeout(&self, operation: &str) {
        counter!("wallet_lock_timeouts_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_wallet_created(&self, currency: &str) {
        counter!("wallet_wallets_created_total", "currency" => currency.to_string()).increment(1);
    }

    pub fn record_rate_limited(&self) {
        counter!("wallet_rate_limited_total").increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("wallet_ledger_operations_total", Unit::Count, "Completed deposits, withdrawals and transfers");
    describe_counter!("wallet_ledger_failures_total", Unit::Count, "Ledger operations that were rejected or aborted");
    describe_histogram!("wallet_ledger_operation_duration_ms", Unit::Milliseconds, "Ledger operation latency in milliseconds");

    describe_counter!("wallet_cancellations_requested_total", Unit::Count, "Cancellation requests created");
    describe_counter!("wallet_cancellations_resolved_total", Unit::Count, "Cancellation requests approved or rejected");
    describe_counter!("wallet_lock_timeouts_total", Unit::Count, "Units of work aborted on a lock timeout");
    describe_counter!("wallet_wallets_created_total", Unit::Count, "Wallets created");
    describe_counter!("wallet_rate_limited_total", Unit::Count, "Requests rejected by the rate limiter");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
