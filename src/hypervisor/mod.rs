#[cfg(test)]
pub mod fake;
pub mod libxenstat;

use crate::client::XenError;

pub trait Connector: Send + Sync + 'static {
    type Handle: Handle + 'static;

    fn connect(&self) -> Result<Self::Handle, XenError>;
}

pub trait Handle: Send {
    type Node<'a>: Node
    where
        Self: 'a;

    fn node(&mut self) -> Option<Self::Node<'_>>;
}

pub trait Node {
    type Domain<'a>: DomainRecord
    where
        Self: 'a;

    fn num_domains(&self) -> u32;
    fn domain(&self, index: u32) -> Option<Self::Domain<'_>>;
}

pub trait DomainRecord {
    fn name(&self) -> Option<String>;
    fn state_flags(&self) -> StateFlags;
    fn cpu_ns(&self) -> u64;
    fn num_vcpus(&self) -> u32;
    fn cur_mem(&self) -> u64;
    fn max_mem(&self) -> u64;
    fn num_vbds(&self) -> u32;
    fn num_networks(&self) -> u32;
    fn vbd(&self, index: u32) -> Option<RawVbd>;
    fn network(&self, index: u32) -> Option<RawNic>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags {
    pub dying: bool,
    pub shutdown: bool,
    pub blocked: bool,
    pub crashed: bool,
    pub paused: bool,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawVbd {
    // Device number, major in bits 8..16 and minor in bits 0..8.
    pub dev: u32,
    pub oo_reqs: u64,
    pub rd_reqs: u64,
    pub wr_reqs: u64,
    pub rd_sects: u64,
    pub wr_sects: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawNic {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}
