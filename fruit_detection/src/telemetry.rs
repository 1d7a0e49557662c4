use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};

pub struct Metrics {
    request_counter: Counter<u64>,
    request_duration: Histogram<u64>,
    fruits_counter: Counter<u64>,
    registry: Registry,
    // Dropping the last provider handle shuts its readers down.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| format!("failed to build prometheus exporter: {}", e))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("fruit_detection");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests by route and outcome")
            .build();

        let request_duration = meter
            .u64_histogram("request_duration_ms")
            .with_boundaries(duration_boundaries())
            .with_description("Detection request duration in milliseconds, upload read included")
            .build();

        let fruits_counter = meter
            .u64_counter("fruits_detected_total")
            .with_description("Total number of fruits returned to clients")
            .build();

        Ok(Metrics {
            request_counter,
            request_duration,
            fruits_counter,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, route: &str, outcome: &str) {
        let attributes = [
            KeyValue::new("route", route.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_request_duration(&self, duration_ms: u64, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.request_duration.record(duration_ms, &attributes);
    }

    pub fn record_fruits(&self, count: usize) {
        self.fruits_counter.add(count as u64, &[]);
    }

    pub fn render(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

/// Fine buckets where CPU inference usually lands, coarse ones for the tail.
fn duration_boundaries() -> Vec<f64> {
    let fine = (10..=200).step_by(10);
    let medium = (250..=1000).step_by(50);
    let coarse = (1500..=5000).step_by(500);

    fine.chain(medium).chain(coarse).map(|x| x as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_boundaries_are_sorted_and_unique() {
        let boundaries = duration_boundaries();
        assert_eq!(boundaries.first(), Some(&10.0));
        assert_eq!(boundaries.last(), Some(&5000.0));
        assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_render_includes_recorded_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/api/v1/fruit/detect", "ok");
        metrics.record_request_duration(42, "/api/v1/fruit/detect");
        metrics.record_fruits(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("requests_total"), "{text}");
        assert!(text.contains("fruits_detected_total"), "{text}");
        assert!(text.contains("request_duration_ms"), "{text}");
    }
}
