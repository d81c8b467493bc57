use prometheus::core::Desc;
use prometheus::proto::{self, LabelPair, MetricFamily, MetricType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NAMESPACE: &str = "xen";
pub const DOMAIN_LABEL: &str = "dom";
pub const VBD_LABEL: &str = "vbd";
pub const NIC_LABEL: &str = "nic";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Device,
    Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Domain,
    Vbd,
    Nic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XenMetric {
    CpuSeconds,
    CpuCount,
    MemoryUsed,
    MemoryMaximum,
    VbdCount,
    NicCount,
    VbdOutOfRequests,
    VbdReadRequests,
    VbdWriteRequests,
    VbdReadBytes,
    VbdWrittenBytes,
    NetTransmitBytes,
    NetReceiveBytes,
}

impl XenMetric {
    pub const ALL: [XenMetric; 13] = [
        XenMetric::CpuSeconds,
        XenMetric::CpuCount,
        XenMetric::MemoryUsed,
        XenMetric::MemoryMaximum,
        XenMetric::VbdCount,
        XenMetric::NicCount,
        XenMetric::VbdOutOfRequests,
        XenMetric::VbdReadRequests,
        XenMetric::VbdWriteRequests,
        XenMetric::VbdReadBytes,
        XenMetric::VbdWrittenBytes,
        XenMetric::NetTransmitBytes,
        XenMetric::NetReceiveBytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            XenMetric::CpuSeconds => "cpu_seconds_total",
            XenMetric::CpuCount => "cpu_count",
            XenMetric::MemoryUsed => "memory_used_bytes",
            XenMetric::MemoryMaximum => "memory_maximum_bytes",
            XenMetric::VbdCount => "vbd_count",
            XenMetric::NicCount => "nic_count",
            XenMetric::VbdOutOfRequests => "vbd_out_of_requests_errors_total",
            XenMetric::VbdReadRequests => "vbd_read_requests_total",
            XenMetric::VbdWriteRequests => "vbd_write_requests_total",
            XenMetric::VbdReadBytes => "vbd_read_bytes_total",
            XenMetric::VbdWrittenBytes => "vbd_written_bytes_total",
            XenMetric::NetTransmitBytes => "net_transmit_bytes_total",
            XenMetric::NetReceiveBytes => "net_receive_bytes_total",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            XenMetric::CpuSeconds => {
                "Total number of seconds spent across all CPUs executing in this domain"
            }
            XenMetric::CpuCount => "Count of virtual CPUs assigned to this domain",
            XenMetric::MemoryUsed => "Memory used by this domain",
            XenMetric::MemoryMaximum => {
                "Maximum memory this domain is allowed to allocate, assuming availability"
            }
            XenMetric::VbdCount => "Count of virtual block devices assigned to this domain",
            XenMetric::NicCount => "Count of virtual network devices assigned to this domain",
            XenMetric::VbdOutOfRequests => {
                "Count of out-of-request situations this domain has encountered"
            }
            XenMetric::VbdReadRequests => "Count of read requests this domain has issued",
            XenMetric::VbdWriteRequests => "Count of write requests this domain has issued",
            XenMetric::VbdReadBytes => {
                "Total bytes this domain has read from virtual block devices"
            }
            XenMetric::VbdWrittenBytes => {
                "Total bytes this domain has written to virtual block devices"
            }
            XenMetric::NetTransmitBytes => {
                "Total bytes this domain has transmitted through virtual network devices"
            }
            XenMetric::NetReceiveBytes => {
                "Total bytes this domain has received through virtual network devices"
            }
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            XenMetric::CpuCount
            | XenMetric::MemoryUsed
            | XenMetric::MemoryMaximum
            | XenMetric::VbdCount
            | XenMetric::NicCount => MetricKind::Gauge,
            _ => MetricKind::Counter,
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            XenMetric::VbdOutOfRequests
            | XenMetric::VbdReadRequests
            | XenMetric::VbdWriteRequests
            | XenMetric::VbdReadBytes
            | XenMetric::VbdWrittenBytes => Scope::Vbd,
            XenMetric::NetTransmitBytes | XenMetric::NetReceiveBytes => Scope::Nic,
            _ => Scope::Domain,
        }
    }

    pub fn label_names(self, granularity: Granularity) -> &'static [&'static str] {
        match (granularity, self.scope()) {
            (Granularity::Device, Scope::Vbd) => &[DOMAIN_LABEL, VBD_LABEL],
            (Granularity::Device, Scope::Nic) => &[DOMAIN_LABEL, NIC_LABEL],
            _ => &[DOMAIN_LABEL],
        }
    }

    pub fn fq_name(self) -> String {
        format!("{NAMESPACE}_{}", self.name())
    }
}

pub struct CatalogEntry {
    pub kind: MetricKind,
    pub desc: Desc,
}

impl CatalogEntry {
    pub fn family(&self) -> MetricFamily {
        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(match self.kind {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Gauge => MetricType::GAUGE,
        });
        family
    }

    pub fn sample(&self, value: f64, label_values: &[&str]) -> proto::Metric {
        let mut metric = proto::Metric::default();
        for (name, value) in self.desc.variable_labels.iter().zip(label_values) {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value((*value).to_string());
            metric.mut_label().push(pair);
        }
        match self.kind {
            MetricKind::Counter => {
                let mut counter = proto::Counter::default();
                counter.set_value(value);
                metric.set_counter(counter);
            }
            MetricKind::Gauge => {
                let mut gauge = proto::Gauge::default();
                gauge.set_value(value);
                metric.set_gauge(gauge);
            }
        }
        metric
    }
}

pub struct Catalog {
    granularity: Granularity,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(granularity: Granularity) -> Result<Self, prometheus::Error> {
        let entries = XenMetric::ALL
            .iter()
            .map(|&metric| {
                let desc = Desc::new(
                    metric.fq_name(),
                    metric.help().to_string(),
                    metric
                        .label_names(granularity)
                        .iter()
                        .map(|label| label.to_string())
                        .collect(),
                    HashMap::new(),
                )?;
                Ok(CatalogEntry {
                    kind: metric.kind(),
                    desc,
                })
            })
            .collect::<Result<Vec<_>, prometheus::Error>>()?;
        Ok(Self {
            granularity,
            entries,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn entry(&self, metric: XenMetric) -> &CatalogEntry {
        &self.entries[metric as usize]
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn descs(&self) -> Vec<&Desc> {
        self.entries.iter().map(|entry| &entry.desc).collect()
    }
}
