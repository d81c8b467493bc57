use super::{Connector, DomainRecord, Handle, Node, RawNic, RawVbd, StateFlags};
use crate::client::XenError;
use libloading::{Library, Symbol};
use std::ffi::{c_char, c_uint, c_ulonglong, CStr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const LIBRARY_NAMES: [&str; 3] = ["libxenstat.so", "libxenstat.so.4", "libxenstat.so.0"];

// XENSTAT_VCPU | XENSTAT_NETWORK | XENSTAT_XEN_VERSION | XENSTAT_VBD
const XENSTAT_ALL: c_uint = 0x1 | 0x2 | 0x4 | 0x8;

#[repr(C)]
struct CHandle {
    _private: [u8; 0],
}

#[repr(C)]
struct CNode {
    _private: [u8; 0],
}

#[repr(C)]
struct CDomain {
    _private: [u8; 0],
}

#[repr(C)]
struct CVbd {
    _private: [u8; 0],
}

#[repr(C)]
struct CNetwork {
    _private: [u8; 0],
}

type InitFn = unsafe extern "C" fn() -> *mut CHandle;
type UninitFn = unsafe extern "C" fn(handle: *mut CHandle);
type GetNodeFn = unsafe extern "C" fn(handle: *mut CHandle, flags: c_uint) -> *mut CNode;
type FreeNodeFn = unsafe extern "C" fn(node: *mut CNode);
type NodeNumDomainsFn = unsafe extern "C" fn(node: *mut CNode) -> c_uint;
type NodeDomainByIndexFn = unsafe extern "C" fn(node: *mut CNode, index: c_uint) -> *mut CDomain;
type DomainNameFn = unsafe extern "C" fn(domain: *mut CDomain) -> *mut c_char;
type DomainUintFn = unsafe extern "C" fn(domain: *mut CDomain) -> c_uint;
type DomainUllFn = unsafe extern "C" fn(domain: *mut CDomain) -> c_ulonglong;
type DomainVbdFn = unsafe extern "C" fn(domain: *mut CDomain, index: c_uint) -> *mut CVbd;
type DomainNetworkFn = unsafe extern "C" fn(domain: *mut CDomain, index: c_uint) -> *mut CNetwork;
type VbdUintFn = unsafe extern "C" fn(vbd: *mut CVbd) -> c_uint;
type VbdUllFn = unsafe extern "C" fn(vbd: *mut CVbd) -> c_ulonglong;
type NetworkUllFn = unsafe extern "C" fn(network: *mut CNetwork) -> c_ulonglong;

struct Api {
    init: InitFn,
    uninit: UninitFn,
    get_node: GetNodeFn,
    free_node: FreeNodeFn,
    node_num_domains: NodeNumDomainsFn,
    node_domain_by_index: NodeDomainByIndexFn,
    domain_name: DomainNameFn,
    domain_dying: DomainUintFn,
    domain_shutdown: DomainUintFn,
    domain_blocked: DomainUintFn,
    domain_crashed: DomainUintFn,
    domain_paused: DomainUintFn,
    domain_running: DomainUintFn,
    domain_cpu_ns: DomainUllFn,
    domain_num_vcpus: DomainUintFn,
    domain_cur_mem: DomainUllFn,
    domain_max_mem: DomainUllFn,
    domain_num_vbds: DomainUintFn,
    domain_num_networks: DomainUintFn,
    domain_vbd: DomainVbdFn,
    domain_network: DomainNetworkFn,
    vbd_dev: VbdUintFn,
    vbd_oo_reqs: VbdUllFn,
    vbd_rd_reqs: VbdUllFn,
    vbd_wr_reqs: VbdUllFn,
    vbd_rd_sects: VbdUllFn,
    vbd_wr_sects: VbdUllFn,
    network_tbytes: NetworkUllFn,
    network_rbytes: NetworkUllFn,
    _library: Library,
}

impl Api {
    fn load(path: Option<&PathBuf>) -> Result<Self, XenError> {
        let library = match path {
            Some(path) => open(path.as_os_str())?,
            None => open_default()?,
        };

        // Safety: the signatures below match xenstat.h.
        unsafe {
            Ok(Self {
                init: symbol(&library, b"xenstat_init\0")?,
                uninit: symbol(&library, b"xenstat_uninit\0")?,
                get_node: symbol(&library, b"xenstat_get_node\0")?,
                free_node: symbol(&library, b"xenstat_free_node\0")?,
                node_num_domains: symbol(&library, b"xenstat_node_num_domains\0")?,
                node_domain_by_index: symbol(&library, b"xenstat_node_domain_by_index\0")?,
                domain_name: symbol(&library, b"xenstat_domain_name\0")?,
                domain_dying: symbol(&library, b"xenstat_domain_dying\0")?,
                domain_shutdown: symbol(&library, b"xenstat_domain_shutdown\0")?,
                domain_blocked: symbol(&library, b"xenstat_domain_blocked\0")?,
                domain_crashed: symbol(&library, b"xenstat_domain_crashed\0")?,
                domain_paused: symbol(&library, b"xenstat_domain_paused\0")?,
                domain_running: symbol(&library, b"xenstat_domain_running\0")?,
                domain_cpu_ns: symbol(&library, b"xenstat_domain_cpu_ns\0")?,
                domain_num_vcpus: symbol(&library, b"xenstat_domain_num_vcpus\0")?,
                domain_cur_mem: symbol(&library, b"xenstat_domain_cur_mem\0")?,
                domain_max_mem: symbol(&library, b"xenstat_domain_max_mem\0")?,
                domain_num_vbds: symbol(&library, b"xenstat_domain_num_vbds\0")?,
                domain_num_networks: symbol(&library, b"xenstat_domain_num_networks\0")?,
                domain_vbd: symbol(&library, b"xenstat_domain_vbd\0")?,
                domain_network: symbol(&library, b"xenstat_domain_network\0")?,
                vbd_dev: symbol(&library, b"xenstat_vbd_dev\0")?,
                vbd_oo_reqs: symbol(&library, b"xenstat_vbd_oo_reqs\0")?,
                vbd_rd_reqs: symbol(&library, b"xenstat_vbd_rd_reqs\0")?,
                vbd_wr_reqs: symbol(&library, b"xenstat_vbd_wr_reqs\0")?,
                vbd_rd_sects: symbol(&library, b"xenstat_vbd_rd_sects\0")?,
                vbd_wr_sects: symbol(&library, b"xenstat_vbd_wr_sects\0")?,
                network_tbytes: symbol(&library, b"xenstat_network_tbytes\0")?,
                network_rbytes: symbol(&library, b"xenstat_network_rbytes\0")?,
                _library: library,
            })
        }
    }
}

fn open(name: &std::ffi::OsStr) -> Result<Library, XenError> {
    // Safety: libxenstat has no library constructors with side effects.
    unsafe { Library::new(name) }.map_err(|err| {
        XenError::CannotConnect(format!(
            "не удалось загрузить {}: {err}",
            name.to_string_lossy()
        ))
    })
}

fn open_default() -> Result<Library, XenError> {
    let mut last_err = None;
    for name in LIBRARY_NAMES {
        match open(name.as_ref()) {
            Ok(library) => return Ok(library),
            Err(err) => {
                debug!(library = name, error = %err, "libxenstat candidate not loadable");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| XenError::CannotConnect("libxenstat не найдена".to_string())))
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T, XenError> {
    let sym: Symbol<T> = library.get(name).map_err(|err| {
        let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]);
        XenError::CannotConnect(format!("в libxenstat нет символа {printable}: {err}"))
    })?;
    Ok(*sym)
}

pub struct LibXenstat {
    path: Option<PathBuf>,
    api: Mutex<Option<Arc<Api>>>,
}

impl LibXenstat {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            api: Mutex::new(None),
        }
    }

    fn api(&self) -> Result<Arc<Api>, XenError> {
        let mut guard = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(api) = guard.as_ref() {
            return Ok(Arc::clone(api));
        }
        let api = Arc::new(Api::load(self.path.as_ref())?);
        info!("libxenstat loaded");
        *guard = Some(Arc::clone(&api));
        Ok(api)
    }
}

impl Connector for LibXenstat {
    type Handle = Connection;

    fn connect(&self) -> Result<Connection, XenError> {
        let api = self.api()?;
        let raw = unsafe { (api.init)() };
        if raw.is_null() {
            return Err(XenError::CannotConnect(
                "xenstat_init вернул NULL".to_string(),
            ));
        }
        Ok(Connection { api, raw })
    }
}

pub struct Connection {
    api: Arc<Api>,
    raw: *mut CHandle,
}

// Safety: a handle may move between threads. XenStats only touches it while
// holding its mutex, so calls never overlap.
unsafe impl Send for Connection {}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { (self.api.uninit)(self.raw) };
    }
}

impl Handle for Connection {
    type Node<'a> = NodeRef<'a> where Self: 'a;

    fn node(&mut self) -> Option<NodeRef<'_>> {
        let raw = unsafe { (self.api.get_node)(self.raw, XENSTAT_ALL) };
        if raw.is_null() {
            return None;
        }
        Some(NodeRef {
            api: &*self.api,
            raw,
        })
    }
}

pub struct NodeRef<'a> {
    api: &'a Api,
    raw: *mut CNode,
}

impl Drop for NodeRef<'_> {
    fn drop(&mut self) {
        unsafe { (self.api.free_node)(self.raw) };
    }
}

impl Node for NodeRef<'_> {
    type Domain<'b> = DomainRef<'b> where Self: 'b;

    fn num_domains(&self) -> u32 {
        unsafe { (self.api.node_num_domains)(self.raw) }
    }

    fn domain(&self, index: u32) -> Option<DomainRef<'_>> {
        let raw = unsafe { (self.api.node_domain_by_index)(self.raw, index) };
        if raw.is_null() {
            return None;
        }
        Some(DomainRef { api: self.api, raw })
    }
}

pub struct DomainRef<'a> {
    api: &'a Api,
    raw: *mut CDomain,
}

impl DomainRecord for DomainRef<'_> {
    fn name(&self) -> Option<String> {
        let ptr = unsafe { (self.api.domain_name)(self.raw) };
        if ptr.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(ptr) };
        Some(name.to_string_lossy().into_owned())
    }

    fn state_flags(&self) -> StateFlags {
        let api = self.api;
        unsafe {
            StateFlags {
                dying: (api.domain_dying)(self.raw) != 0,
                shutdown: (api.domain_shutdown)(self.raw) != 0,
                blocked: (api.domain_blocked)(self.raw) != 0,
                crashed: (api.domain_crashed)(self.raw) != 0,
                paused: (api.domain_paused)(self.raw) != 0,
                running: (api.domain_running)(self.raw) != 0,
            }
        }
    }

    fn cpu_ns(&self) -> u64 {
        unsafe { (self.api.domain_cpu_ns)(self.raw) }
    }

    fn num_vcpus(&self) -> u32 {
        unsafe { (self.api.domain_num_vcpus)(self.raw) }
    }

    fn cur_mem(&self) -> u64 {
        unsafe { (self.api.domain_cur_mem)(self.raw) }
    }

    fn max_mem(&self) -> u64 {
        unsafe { (self.api.domain_max_mem)(self.raw) }
    }

    fn num_vbds(&self) -> u32 {
        unsafe { (self.api.domain_num_vbds)(self.raw) }
    }

    fn num_networks(&self) -> u32 {
        unsafe { (self.api.domain_num_networks)(self.raw) }
    }

    fn vbd(&self, index: u32) -> Option<RawVbd> {
        let api = self.api;
        unsafe {
            let vbd = (api.domain_vbd)(self.raw, index);
            if vbd.is_null() {
                return None;
            }
            Some(RawVbd {
                dev: (api.vbd_dev)(vbd),
                oo_reqs: (api.vbd_oo_reqs)(vbd),
                rd_reqs: (api.vbd_rd_reqs)(vbd),
                wr_reqs: (api.vbd_wr_reqs)(vbd),
                rd_sects: (api.vbd_rd_sects)(vbd),
                wr_sects: (api.vbd_wr_sects)(vbd),
            })
        }
    }

    fn network(&self, index: u32) -> Option<RawNic> {
        let api = self.api;
        unsafe {
            let network = (api.domain_network)(self.raw, index);
            if network.is_null() {
                return None;
            }
            Some(RawNic {
                tx_bytes: (api.network_tbytes)(network),
                rx_bytes: (api.network_rbytes)(network),
            })
        }
    }
}
