use crate::hypervisor::{Connector, DomainRecord, Handle, Node};
use crate::snapshot::{
    cpu_seconds_from_ns, BlockDeviceSnapshot, DomainSnapshot, DomainState, NetworkDeviceSnapshot,
};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XenError {
    #[error("не удалось подключиться к xenstat: {0}")]
    CannotConnect(String),
    #[error("соединение с xenstat потеряно")]
    Disconnected,
    #[error("не удалось прочитать {kind} {index} домена {domain}")]
    DeviceRead {
        domain: String,
        kind: DeviceKind,
        index: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Vbd,
    Nic,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Vbd => f.write_str("VBD"),
            DeviceKind::Nic => f.write_str("NIC"),
        }
    }
}

pub struct XenStats<H> {
    handle: Mutex<Option<H>>,
}

impl<H: Handle> XenStats<H> {
    pub fn connect<C>(connector: &C) -> Result<Self, XenError>
    where
        C: Connector<Handle = H>,
    {
        let handle = connector.connect()?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    pub fn close(&self) {
        self.lock().take();
    }

    pub fn poll(&self) -> Result<Vec<DomainSnapshot>, XenError> {
        let mut guard = self.lock();
        let Some(handle) = guard.as_mut() else {
            return Err(XenError::Disconnected);
        };
        match read_node(handle) {
            Ok(domains) => Ok(domains),
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<H>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_node<H: Handle>(handle: &mut H) -> Result<Vec<DomainSnapshot>, XenError> {
    let node = handle.node().ok_or(XenError::Disconnected)?;
    let count = node.num_domains();
    let mut domains = Vec::with_capacity(count as usize);
    for index in 0..count {
        let domain = node.domain(index).ok_or(XenError::Disconnected)?;
        domains.push(read_domain(&domain)?);
    }
    Ok(domains)
}

fn read_domain<D: DomainRecord>(domain: &D) -> Result<DomainSnapshot, XenError> {
    let name = domain.name().ok_or(XenError::Disconnected)?;

    let block_devices = (0..domain.num_vbds())
        .filter_map(|index| {
            skip_unreadable(
                domain
                    .vbd(index)
                    .map(BlockDeviceSnapshot::from)
                    .ok_or_else(|| device_error(&name, DeviceKind::Vbd, index)),
            )
        })
        .collect();
    let network_devices = (0..domain.num_networks())
        .filter_map(|index| {
            skip_unreadable(
                domain
                    .network(index)
                    .map(NetworkDeviceSnapshot::from)
                    .ok_or_else(|| device_error(&name, DeviceKind::Nic, index)),
            )
        })
        .collect();

    Ok(DomainSnapshot {
        state: DomainState::from_flags(domain.state_flags()),
        cpu_seconds: cpu_seconds_from_ns(domain.cpu_ns()),
        vcpu_count: domain.num_vcpus(),
        memory_bytes: domain.cur_mem(),
        max_memory_bytes: domain.max_mem(),
        block_devices,
        network_devices,
        name,
    })
}

fn device_error(domain: &str, kind: DeviceKind, index: u32) -> XenError {
    XenError::DeviceRead {
        domain: domain.to_string(),
        kind,
        index,
    }
}

fn skip_unreadable<T>(result: Result<T, XenError>) -> Option<T> {
    match result {
        Ok(device) => Some(device),
        Err(err) => {
            warn!(error = %err, "skipping unreadable device");
            None
        }
    }
}
