use crate::hypervisor::{RawNic, RawVbd, StateFlags};
use serde::Serialize;

pub const SECTOR_SIZE: u64 = 512;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    Running,
    Blocked,
    Paused,
    Shutdown,
    Crashed,
    Dying,
    Unknown,
}

impl DomainState {
    // Flags are applied in a fixed order and the last set flag wins:
    // running, paused, crashed, blocked, shutdown, dying.
    pub fn from_flags(flags: StateFlags) -> Self {
        let mut state = DomainState::Unknown;
        if flags.running {
            state = DomainState::Running;
        }
        if flags.paused {
            state = DomainState::Paused;
        }
        if flags.crashed {
            state = DomainState::Crashed;
        }
        if flags.blocked {
            state = DomainState::Blocked;
        }
        if flags.shutdown {
            state = DomainState::Shutdown;
        }
        if flags.dying {
            state = DomainState::Dying;
        }
        state
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSnapshot {
    pub name: String,
    pub state: DomainState,
    pub cpu_seconds: f64,
    pub vcpu_count: u32,
    pub memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub block_devices: Vec<BlockDeviceSnapshot>,
    pub network_devices: Vec<NetworkDeviceSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockDeviceSnapshot {
    pub major: u8,
    pub minor: u8,
    pub out_of_requests_count: u64,
    pub read_requests_count: u64,
    pub write_requests_count: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl From<RawVbd> for BlockDeviceSnapshot {
    fn from(raw: RawVbd) -> Self {
        Self {
            major: ((raw.dev >> 8) & 0xff) as u8,
            minor: (raw.dev & 0xff) as u8,
            out_of_requests_count: raw.oo_reqs,
            read_requests_count: raw.rd_reqs,
            write_requests_count: raw.wr_reqs,
            bytes_read: raw.rd_sects.saturating_mul(SECTOR_SIZE),
            bytes_written: raw.wr_sects.saturating_mul(SECTOR_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkDeviceSnapshot {
    pub bytes_transmitted: u64,
    pub bytes_received: u64,
}

impl From<RawNic> for NetworkDeviceSnapshot {
    fn from(raw: RawNic) -> Self {
        Self {
            bytes_transmitted: raw.tx_bytes,
            bytes_received: raw.rx_bytes,
        }
    }
}

pub fn cpu_seconds_from_ns(ns: u64) -> f64 {
    ns as f64 / NANOS_PER_SECOND
}
