use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub roster_refreshes_total: IntCounterVec,
    pub roster_refresh_latency_seconds: HistogramVec,
    pub roster_entries: IntGauge,
    pub realtime_events_total: IntCounterVec,
    pub location_reports_total: IntCounterVec,
    pub alarm_active: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let roster_refreshes_total = IntCounterVec::new(
            Opts::new("roster_refreshes_total", "Roster refreshes by outcome"),
            &["outcome"],
        )
        .expect("valid roster_refreshes_total metric");

        let roster_refresh_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "roster_refresh_latency_seconds",
                "Latency of roster refresh round trips in seconds",
            ),
            &["outcome"],
        )
        .expect("valid roster_refresh_latency_seconds metric");

        let roster_entries = IntGauge::new(
            "roster_entries",
            "Entries in the last server-confirmed roster",
        )
        .expect("valid roster_entries metric");

        let realtime_events_total = IntCounterVec::new(
            Opts::new("realtime_events_total", "Realtime channel events by kind"),
            &["event"],
        )
        .expect("valid realtime_events_total metric");

        let location_reports_total = IntCounterVec::new(
            Opts::new("location_reports_total", "Location reports by outcome"),
            &["outcome"],
        )
        .expect("valid location_reports_total metric");

        let alarm_active = IntGauge::new(
            "alarm_active",
            "Whether the dock-call alarm is currently looping (0/1)",
        )
        .expect("valid alarm_active metric");

        registry
            .register(Box::new(roster_refreshes_total.clone()))
            .expect("register roster_refreshes_total");
        registry
            .register(Box::new(roster_refresh_latency_seconds.clone()))
            .expect("register roster_refresh_latency_seconds");
        registry
            .register(Box::new(roster_entries.clone()))
            .expect("register roster_entries");
        registry
            .register(Box::new(realtime_events_total.clone()))
            .expect("register realtime_events_total");
        registry
            .register(Box::new(location_reports_total.clone()))
            .expect("register location_reports_total");
        registry
            .register(Box::new(alarm_active.clone()))
            .expect("register alarm_active");

        Self {
            registry,
            roster_refreshes_total,
            roster_refresh_latency_seconds,
            roster_entries,
            realtime_events_total,
            location_reports_total,
            alarm_active,
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
