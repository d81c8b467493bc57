use crate::collector::XenCollector;
use crate::hypervisor::Connector;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{opts, Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    xen: Registry,
    exporter: Registry,
    pub scrapes_total: IntCounter,
}

impl Metrics {
    pub fn new<C: Connector>(collector: &XenCollector<C>) -> Result<Arc<Self>, prometheus::Error> {
        let xen = Registry::new();
        let exporter = Registry::new();

        let scrapes_total = IntCounter::with_opts(opts!(
            "xen_exporter_scrapes_total",
            "Number of /metrics requests served"
        ))?;
        let status = collector.status();

        register(&exporter, &scrapes_total)?;
        register(&exporter, &status.up)?;
        register(&exporter, &status.errors)?;
        register(&xen, collector)?;

        Ok(Arc::new(Self {
            xen,
            exporter,
            scrapes_total,
        }))
    }

    pub fn inc_scrape_count(&self) {
        self.scrapes_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        // Xen first so the status metrics describe this very poll.
        let mut families = self.xen.gather();
        families.extend(self.exporter.gather());
        encode(&families)
    }

    pub fn encode_exporter_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        encode(&self.exporter.gather())
    }
}

fn encode(families: &[MetricFamily]) -> Result<Vec<u8>, prometheus::Error> {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(families, &mut buf)?;
    Ok(buf)
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
