use super::{Connector, DomainRecord, Handle, Node, RawNic, RawVbd, StateFlags};
use crate::client::XenError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakeDomain {
    // `None` makes the name accessor fail.
    pub name: Option<String>,
    pub flags: StateFlags,
    pub cpu_ns: u64,
    pub vcpus: u32,
    pub mem: u64,
    pub max_mem: u64,
    // `None` entries make the device accessor fail for that index.
    pub vbds: Vec<Option<RawVbd>>,
    pub nics: Vec<Option<RawNic>>,
}

impl FakeDomain {
    pub fn running(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            flags: StateFlags {
                running: true,
                ..StateFlags::default()
            },
            ..Self::default()
        }
    }

    pub fn with_vbd(mut self, vbd: RawVbd) -> Self {
        self.vbds.push(Some(vbd));
        self
    }

    pub fn with_nic(mut self, nic: RawNic) -> Self {
        self.nics.push(Some(nic));
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    // `None` entries make the node fail to hand out that domain.
    pub domains: Vec<Option<FakeDomain>>,
    pub refuse_connect: bool,
    pub fail_node: bool,
    pub poll_delay: Option<Duration>,
    pub connects: u32,
    pub uninits: u32,
    pub nodes_taken: u32,
    pub nodes_freed: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FakeHypervisor {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHypervisor {
    pub fn with_domains(domains: Vec<FakeDomain>) -> Self {
        let fake = Self::default();
        fake.state().domains = domains.into_iter().map(Some).collect();
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for FakeHypervisor {
    type Handle = FakeHandle;

    fn connect(&self) -> Result<FakeHandle, XenError> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(XenError::CannotConnect("xenstat недоступен".to_string()));
        }
        state.connects += 1;
        Ok(FakeHandle {
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.state().uninits += 1;
    }
}

impl Handle for FakeHandle {
    type Node<'a> = FakeNode where Self: 'a;

    fn node(&mut self) -> Option<FakeNode> {
        let delay = {
            let mut state = self.state();
            if state.fail_node {
                return None;
            }
            state.nodes_taken += 1;
            state.poll_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let domains = self.state().domains.clone();
        Some(FakeNode {
            domains,
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub struct FakeNode {
    domains: Vec<Option<FakeDomain>>,
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes_freed += 1;
    }
}

impl Node for FakeNode {
    type Domain<'a> = &'a FakeDomain where Self: 'a;

    fn num_domains(&self) -> u32 {
        self.domains.len() as u32
    }

    fn domain(&self, index: u32) -> Option<&FakeDomain> {
        self.domains.get(index as usize)?.as_ref()
    }
}

impl DomainRecord for &FakeDomain {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn state_flags(&self) -> StateFlags {
        self.flags
    }

    fn cpu_ns(&self) -> u64 {
        self.cpu_ns
    }

    fn num_vcpus(&self) -> u32 {
        self.vcpus
    }

    fn cur_mem(&self) -> u64 {
        self.mem
    }

    fn max_mem(&self) -> u64 {
        self.max_mem
    }

    fn num_vbds(&self) -> u32 {
        self.vbds.len() as u32
    }

    fn num_networks(&self) -> u32 {
        self.nics.len() as u32
    }

    fn vbd(&self, index: u32) -> Option<RawVbd> {
        *self.vbds.get(index as usize)?
    }

    fn network(&self, index: u32) -> Option<RawNic> {
        *self.nics.get(index as usize)?
    }
}
