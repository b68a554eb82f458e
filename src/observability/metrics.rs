use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub deliveries_in_queue: IntGauge,
    pub assignment_latency_seconds: HistogramVec,
    pub route_client_failures_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let deliveries_in_queue = IntGauge::new(
            "deliveries_in_queue",
            "Delivery-created events waiting for dispatch",
        )
        .expect("valid deliveries_in_queue metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let route_client_failures_total = IntCounterVec::new(
            Opts::new(
                "route_client_failures_total",
                "Route service calls that exhausted their retries",
            ),
            &["operation"],
        )
        .expect("valid route_client_failures_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(deliveries_in_queue.clone()))
            .expect("register deliveries_in_queue");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(route_client_failures_total.clone()))
            .expect("register route_client_failures_total");

        Self {
            registry,
            assignments_total,
            deliveries_in_queue,
            assignment_latency_seconds,
            route_client_failures_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
