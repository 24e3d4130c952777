use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub connections: IntGauge,
    pub offers_total: IntCounterVec,
    pub accepts_total: IntCounterVec,
    pub accept_latency_seconds: HistogramVec,
    pub location_updates_total: IntCounter,
    pub rate_limited_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections = IntGauge::new("connections", "Currently connected sockets")
            .expect("valid connections metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Ride offer transitions by outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let accepts_total = IntCounterVec::new(
            Opts::new("accepts_total", "Driver accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accepts_total metric");

        let accept_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "accept_latency_seconds",
                "Latency of accept evaluation in seconds",
            ),
            &["outcome"],
        )
        .expect("valid accept_latency_seconds metric");

        let location_updates_total =
            IntCounter::new("location_updates_total", "Applied driver location updates")
                .expect("valid location_updates_total metric");

        let rate_limited_total = IntCounterVec::new(
            Opts::new("rate_limited_total", "Events rejected by rate limiting"),
            &["event"],
        )
        .expect("valid rate_limited_total metric");

        registry
            .register(Box::new(connections.clone()))
            .expect("register connections");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(accepts_total.clone()))
            .expect("register accepts_total");
        registry
            .register(Box::new(accept_latency_seconds.clone()))
            .expect("register accept_latency_seconds");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("register rate_limited_total");

        Self {
            registry,
            connections,
            offers_total,
            accepts_total,
            accept_latency_seconds,
            location_updates_total,
            rate_limited_total,
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
