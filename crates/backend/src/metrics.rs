use anyhow::Result;
use common::types::{Side, WalletType};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn describe() {
    describe_gauge!(
        "afribourse_build_info",
        "Build info for the AfriBourse backend (value is always 1)."
    );
    describe_histogram!(
        "afribourse_db_query_latency_ms",
        "SQLite call latency in milliseconds, by operation and status."
    );
    describe_counter!(
        "afribourse_db_query_errors_total",
        "SQLite calls that returned an error, by operation."
    );
    describe_counter!(
        "afribourse_trades_total",
        "Executed paper trades, by side and wallet type."
    );
    describe_counter!(
        "afribourse_gate_rejections_total",
        "Requests refused by the trading-window or enrollment gates, by error code."
    );
}

/// Install the global Prometheus recorder once and return a handle for rendering `/metrics`.
///
/// Upkeep runs on each `/metrics` request.
pub fn init_global() -> Result<PrometheusHandle> {
    let handle = match PROM_HANDLE.get() {
        Some(handle) => handle.clone(),
        None => {
            describe();
            let handle = PrometheusBuilder::new().install_recorder()?;
            // A concurrent initializer may have won; either handle renders the same registry.
            let _ = PROM_HANDLE.set(handle.clone());
            handle
        }
    };

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".to_string());
    metrics::gauge!(
        "afribourse_build_info",
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle)
}

pub fn record_trade(side: Side, wallet: WalletType) {
    metrics::counter!(
        "afribourse_trades_total",
        "side" => side.as_str(),
        "wallet" => wallet.as_str()
    )
    .increment(1);
}

pub fn record_gate_rejection(code: &'static str) {
    metrics::counter!("afribourse_gate_rejections_total", "code" => code).increment(1);
}
