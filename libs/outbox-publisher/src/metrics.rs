use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

/// Outbox health metrics on the default registry.
#[derive(Clone)]
pub struct OutboxMetrics {
    /// Active rows seen at the start of the latest pass.
    pub pending: IntGauge,
    pub published: IntCounter,
    pub failed_passes: IntCounter,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "outbox_pending_count",
                "Number of active outbox rows awaiting publish",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_pending_count");

        let published = IntCounter::with_opts(
            Opts::new(
                "outbox_published_total",
                "Total outbox rows handed to the broker",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_published_total");

        let failed_passes = IntCounter::with_opts(
            Opts::new(
                "outbox_failed_passes_total",
                "Total drain passes that rolled back",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_failed_passes_total");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(published.clone()),
            Box::new(failed_passes.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("failed to register outbox metric: {}", e);
            }
        }

        Self {
            pending,
            published,
            failed_passes,
        }
    }
}
