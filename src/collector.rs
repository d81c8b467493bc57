use crate::catalog::{Catalog, Granularity, XenMetric};
use crate::client::{XenError, XenStats};
use crate::hypervisor::Connector;
use crate::snapshot::DomainSnapshot;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{opts, IntCounterVec, IntGauge};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct CollectStatus {
    pub up: IntGauge,
    pub errors: IntCounterVec,
}

impl CollectStatus {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            up: IntGauge::with_opts(opts!(
                "xen_exporter_up",
                "Whether the last collection polled the hypervisor successfully"
            ))?,
            errors: IntCounterVec::new(
                opts!(
                    "xen_exporter_collect_errors_total",
                    "Failed collections by error class"
                ),
                &["error"],
            )?,
        })
    }

    fn failed(&self, class: &str) {
        self.up.set(0);
        self.errors.with_label_values(&[class]).inc();
    }
}

pub struct XenCollector<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for XenCollector<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: Connector> {
    connector: C,
    catalog: Catalog,
    client: Mutex<Option<Arc<XenStats<C::Handle>>>>,
    status: CollectStatus,
}

impl<C: Connector> XenCollector<C> {
    pub fn new(connector: C, granularity: Granularity) -> Result<Self, prometheus::Error> {
        Ok(Self {
            inner: Arc::new(Inner {
                connector,
                catalog: Catalog::new(granularity)?,
                client: Mutex::new(None),
                status: CollectStatus::new()?,
            }),
        })
    }

    pub fn status(&self) -> &CollectStatus {
        &self.inner.status
    }

    pub fn is_connected(&self) -> bool {
        self.slot().as_ref().is_some_and(|client| client.is_connected())
    }

    // Counts towards the exporter status; `/metrics` collections go through here.
    pub fn poll(&self) -> Option<Vec<DomainSnapshot>> {
        match self.snapshot() {
            Ok(domains) => {
                self.inner.status.up.set(1);
                Some(domains)
            }
            Err(XenError::CannotConnect(_)) => {
                self.inner.status.failed("connect");
                None
            }
            Err(_) => {
                self.inner.status.failed("disconnected");
                None
            }
        }
    }

    pub fn snapshot(&self) -> Result<Vec<DomainSnapshot>, XenError> {
        let client = self.client().inspect_err(|err| {
            warn!(error = %err, "error collecting metrics");
        })?;

        match client.poll() {
            Ok(domains) => {
                debug!(domains = domains.len(), "xenstat poll complete");
                Ok(domains)
            }
            Err(err) => {
                warn!(error = %err, "error collecting metrics, dropping connection");
                client.close();
                self.discard(&client);
                Err(err)
            }
        }
    }

    pub fn close(&self) {
        if let Some(client) = self.slot().take() {
            client.close();
        }
    }

    pub fn flatten(&self, domains: &[DomainSnapshot]) -> Vec<MetricFamily> {
        let catalog = &self.inner.catalog;
        let mut families: Vec<MetricFamily> = catalog
            .entries()
            .iter()
            .map(|entry| entry.family())
            .collect();
        let mut emit = |metric: XenMetric, value: f64, labels: &[&str]| {
            families[metric as usize]
                .mut_metric()
                .push(catalog.entry(metric).sample(value, labels));
        };

        for domain in domains {
            let dom = domain.name.as_str();
            emit(XenMetric::CpuSeconds, domain.cpu_seconds, &[dom]);
            emit(XenMetric::CpuCount, domain.vcpu_count as f64, &[dom]);
            emit(XenMetric::MemoryUsed, domain.memory_bytes as f64, &[dom]);
            emit(
                XenMetric::MemoryMaximum,
                domain.max_memory_bytes as f64,
                &[dom],
            );
            emit(
                XenMetric::VbdCount,
                domain.block_devices.len() as f64,
                &[dom],
            );
            emit(
                XenMetric::NicCount,
                domain.network_devices.len() as f64,
                &[dom],
            );

            match catalog.granularity() {
                Granularity::Device => {
                    for (index, vbd) in domain.block_devices.iter().enumerate() {
                        let index = index.to_string();
                        let labels = [dom, index.as_str()];
                        emit(
                            XenMetric::VbdOutOfRequests,
                            vbd.out_of_requests_count as f64,
                            &labels,
                        );
                        emit(
                            XenMetric::VbdReadRequests,
                            vbd.read_requests_count as f64,
                            &labels,
                        );
                        emit(
                            XenMetric::VbdWriteRequests,
                            vbd.write_requests_count as f64,
                            &labels,
                        );
                        emit(XenMetric::VbdReadBytes, vbd.bytes_read as f64, &labels);
                        emit(
                            XenMetric::VbdWrittenBytes,
                            vbd.bytes_written as f64,
                            &labels,
                        );
                    }
                    for (index, nic) in domain.network_devices.iter().enumerate() {
                        let index = index.to_string();
                        let labels = [dom, index.as_str()];
                        emit(
                            XenMetric::NetTransmitBytes,
                            nic.bytes_transmitted as f64,
                            &labels,
                        );
                        emit(
                            XenMetric::NetReceiveBytes,
                            nic.bytes_received as f64,
                            &labels,
                        );
                    }
                }
                Granularity::Domain => {
                    let vbds = &domain.block_devices;
                    let nics = &domain.network_devices;
                    emit(
                        XenMetric::VbdOutOfRequests,
                        total(vbds.iter().map(|v| v.out_of_requests_count)),
                        &[dom],
                    );
                    emit(
                        XenMetric::VbdReadRequests,
                        total(vbds.iter().map(|v| v.read_requests_count)),
                        &[dom],
                    );
                    emit(
                        XenMetric::VbdWriteRequests,
                        total(vbds.iter().map(|v| v.write_requests_count)),
                        &[dom],
                    );
                    emit(
                        XenMetric::VbdReadBytes,
                        total(vbds.iter().map(|v| v.bytes_read)),
                        &[dom],
                    );
                    emit(
                        XenMetric::VbdWrittenBytes,
                        total(vbds.iter().map(|v| v.bytes_written)),
                        &[dom],
                    );
                    emit(
                        XenMetric::NetTransmitBytes,
                        total(nics.iter().map(|n| n.bytes_transmitted)),
                        &[dom],
                    );
                    emit(
                        XenMetric::NetReceiveBytes,
                        total(nics.iter().map(|n| n.bytes_received)),
                        &[dom],
                    );
                }
            }
        }

        families.retain(|family| !family.get_metric().is_empty());
        families
    }

    fn client(&self) -> Result<Arc<XenStats<C::Handle>>, XenError> {
        let mut slot = self.slot();
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(XenStats::connect(&self.inner.connector)?);
        info!("connected to xenstat");
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    // Forgets `stale` unless another scrape already replaced it.
    fn discard(&self, stale: &Arc<XenStats<C::Handle>>) {
        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, stale))
        {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<XenStats<C::Handle>>>> {
        self.inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn total(values: impl Iterator<Item = u64>) -> f64 {
    values.fold(0_u64, u64::saturating_add) as f64
}

impl<C: Connector> Collector for XenCollector<C> {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.catalog.descs()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.poll() {
            Some(domains) => self.flatten(&domains),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::fake::{FakeDomain, FakeHypervisor};
    use crate::hypervisor::{RawNic, RawVbd};

    fn sample_count(families: &[MetricFamily]) -> usize {
        families.iter().map(|f| f.get_metric().len()).sum()
    }

    fn find(families: &[MetricFamily], name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let family = families.iter().find(|f| f.get_name() == name)?;
        family
            .get_metric()
            .iter()
            .find(|m| {
                let got: Vec<(&str, &str)> = m
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name(), l.get_value()))
                    .collect();
                got == labels
            })
            .map(|m| {
                if m.has_counter() {
                    m.get_counter().get_value()
                } else {
                    m.get_gauge().get_value()
                }
            })
    }

    fn vm1() -> FakeDomain {
        let mut dom = FakeDomain::running("vm1").with_vbd(RawVbd {
            dev: 202 << 8,
            oo_reqs: 0,
            rd_reqs: 10,
            wr_reqs: 5,
            rd_sects: 100,
            wr_sects: 50,
        });
        dom.cpu_ns = 2_000_000_000;
        dom
    }

    #[test]
    fn single_domain_scenario() {
        let fake = FakeHypervisor::with_domains(vec![vm1()]);
        let collector = XenCollector::new(fake, Granularity::Device).expect("коллектор");

        let families = collector.collect();

        assert_eq!(
            find(&families, "xen_cpu_seconds_total", &[("dom", "vm1")]),
            Some(2.0)
        );
        assert_eq!(
            find(
                &families,
                "xen_vbd_read_bytes_total",
                &[("dom", "vm1"), ("vbd", "0")]
            ),
            Some(51_200.0)
        );
        assert_eq!(
            find(
                &families,
                "xen_vbd_written_bytes_total",
                &[("dom", "vm1"), ("vbd", "0")]
            ),
            Some(25_600.0)
        );
        assert_eq!(
            find(
                &families,
                "xen_vbd_write_requests_total",
                &[("dom", "vm1"), ("vbd", "0")]
            ),
            Some(5.0)
        );
        assert_eq!(find(&families, "xen_vbd_count", &[("dom", "vm1")]), Some(1.0));
        assert_eq!(find(&families, "xen_nic_count", &[("dom", "vm1")]), Some(0.0));
        assert!(families
            .iter()
            .all(|f| f.get_name() != "xen_net_transmit_bytes_total"));
        assert_eq!(sample_count(&families), 6 + 5);
        assert_eq!(collector.status().up.get(), 1);
    }

    #[test]
    fn sample_count_follows_device_count() {
        let nic = RawNic {
            tx_bytes: 1,
            rx_bytes: 2,
        };
        let big = vm1().with_vbd(RawVbd::default()).with_nic(nic).with_nic(nic);
        let bare = FakeDomain::running("vm2");
        let fake = FakeHypervisor::with_domains(vec![big, bare]);
        let collector = XenCollector::new(fake, Granularity::Device).expect("коллектор");

        let families = collector.collect();

        assert_eq!(sample_count(&families), (6 + 5 * 2 + 2 * 2) + 6);
        assert_eq!(
            find(
                &families,
                "xen_net_receive_bytes_total",
                &[("dom", "vm1"), ("nic", "1")]
            ),
            Some(2.0)
        );
    }

    #[test]
    fn domain_granularity_sums_devices() {
        let second = RawVbd {
            dev: (202 << 8) | 16,
            rd_sects: 4,
            ..RawVbd::default()
        };
        let dom = vm1()
            .with_vbd(second)
            .with_nic(RawNic {
                tx_bytes: 10,
                rx_bytes: 1,
            })
            .with_nic(RawNic {
                tx_bytes: 5,
                rx_bytes: 1,
            });
        let fake = FakeHypervisor::with_domains(vec![dom]);
        let collector = XenCollector::new(fake, Granularity::Domain).expect("коллектор");

        let families = collector.collect();

        assert_eq!(sample_count(&families), 13);
        assert_eq!(
            find(&families, "xen_vbd_read_bytes_total", &[("dom", "vm1")]),
            Some((100.0 + 4.0) * 512.0)
        );
        assert_eq!(
            find(&families, "xen_net_transmit_bytes_total", &[("dom", "vm1")]),
            Some(15.0)
        );
        assert_eq!(find(&families, "xen_vbd_count", &[("dom", "vm1")]), Some(2.0));
    }

    #[test]
    fn failed_connect_collects_nothing() {
        let fake = FakeHypervisor::with_domains(vec![vm1()]);
        fake.state().refuse_connect = true;
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");

        assert!(collector.collect().is_empty());
        assert!(!collector.is_connected());
        assert_eq!(collector.status().up.get(), 0);
        assert_eq!(
            collector
                .status()
                .errors
                .with_label_values(&["connect"])
                .get(),
            1
        );

        fake.state().refuse_connect = false;
        assert_eq!(sample_count(&collector.collect()), 11);
    }

    #[test]
    fn disconnect_forces_fresh_connect_on_next_collect() {
        let fake = FakeHypervisor::with_domains(vec![vm1()]);
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");
        assert!(!collector.collect().is_empty());
        assert_eq!(fake.state().connects, 1);

        fake.state().fail_node = true;
        assert!(collector.collect().is_empty());
        assert!(!collector.is_connected());
        assert_eq!(fake.state().uninits, 1);
        assert_eq!(
            collector
                .status()
                .errors
                .with_label_values(&["disconnected"])
                .get(),
            1
        );

        fake.state().fail_node = false;
        assert!(!collector.collect().is_empty());
        assert_eq!(fake.state().connects, 2);
    }

    #[test]
    fn describe_is_stable_and_independent_of_connection() {
        let fake = FakeHypervisor::default();
        fake.state().refuse_connect = true;
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");

        let first: Vec<String> = collector.desc().iter().map(|d| d.fq_name.clone()).collect();
        collector.collect();
        let second: Vec<String> = collector.desc().iter().map(|d| d.fq_name.clone()).collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), XenMetric::ALL.len());
        assert_eq!(fake.state().connects, 0);
    }

    #[test]
    fn snapshot_leaves_status_untouched() {
        let fake = FakeHypervisor::with_domains(vec![vm1()]);
        fake.state().refuse_connect = true;
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");

        assert!(matches!(
            collector.snapshot(),
            Err(XenError::CannotConnect(_))
        ));
        assert_eq!(
            collector
                .status()
                .errors
                .with_label_values(&["connect"])
                .get(),
            0
        );

        fake.state().refuse_connect = false;
        assert_eq!(collector.snapshot().expect("опрос").len(), 1);
        assert_eq!(collector.status().up.get(), 0);
    }

    #[test]
    fn no_domains_means_no_families() {
        let fake = FakeHypervisor::with_domains(vec![]);
        let collector = XenCollector::new(fake, Granularity::Device).expect("коллектор");
        assert!(collector.collect().is_empty());
        assert!(collector.is_connected());
        assert_eq!(collector.status().up.get(), 1);
    }

    #[test]
    fn vanished_domain_leaves_no_stale_series() {
        let fake = FakeHypervisor::with_domains(vec![vm1(), FakeDomain::running("vm2")]);
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");
        assert_eq!(sample_count(&collector.collect()), 11 + 6);

        fake.state().domains.truncate(1);
        let families = collector.collect();
        assert_eq!(sample_count(&families), 11);
        assert_eq!(find(&families, "xen_cpu_count", &[("dom", "vm2")]), None);
    }

    #[test]
    fn close_releases_connection() {
        let fake = FakeHypervisor::with_domains(vec![vm1()]);
        let collector = XenCollector::new(fake.clone(), Granularity::Device).expect("коллектор");
        collector.collect();
        collector.close();
        collector.close();
        assert_eq!(fake.state().uninits, 1);
        assert!(!collector.is_connected());
    }
}
