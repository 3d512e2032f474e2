use metrics_exporter_prometheus::PrometheusBuilder;

// Exercises the public `common::observability` surface only.

#[test]
fn error_events_are_counted() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, _otel_guard) =
            common::observability::build_dispatch("afribourse-test", "info");

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(ticker = "SNTS", "not counted");
            tracing::error!(portfolio_id = 7, "cash balance went negative");
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("tracing_error_events 1"),
        "expected exactly one counted error event, got:\n{rendered}"
    );
}

#[test]
fn filtered_out_errors_are_not_counted() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, _otel_guard) =
            common::observability::build_dispatch("afribourse-test", "off");

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::error!("suppressed by the filter");
        });
    });

    assert!(!handle.render().contains("tracing_error_events"));
}
