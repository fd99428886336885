//! Linux collaborators for the acquisition pipeline: `iw` scanning, gpsd
//! positions and capability probing.

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::io;
use std::path::Path;

mod caps;
mod gpsd;
mod iw;

pub use caps::LinuxCapabilities;
pub use gpsd::{parse_tpv, GpsdSource, Tpv};
pub use iw::{parse_iw_scan_output, IwScanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub flags: u32,
}

impl InterfaceInfo {
    pub fn is_up(&self) -> bool {
        (self.flags & (libc::IFF_UP as u32)) != 0
    }
}

/// Whether the kernel exposes `name` as a wireless (cfg80211) device.
pub fn is_wireless(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).join("wireless").exists()
}

/// Wireless interfaces known to the kernel, one entry per name.
pub fn wireless_interfaces() -> io::Result<Vec<InterfaceInfo>> {
    let mut map: BTreeMap<String, u32> = BTreeMap::new();
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    let rv = unsafe { libc::getifaddrs(&mut ifap) };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut cur = ifap;
    unsafe {
        while !cur.is_null() {
            let ifa = &*cur;
            if !ifa.ifa_name.is_null() {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().to_string();
                map.insert(name, ifa.ifa_flags as u32);
            }
            cur = ifa.ifa_next;
        }
        libc::freeifaddrs(ifap);
    }
    Ok(map
        .into_iter()
        .filter(|(name, _)| is_wireless(name))
        .map(|(name, flags)| InterfaceInfo { name, flags })
        .collect())
}

/// First wireless interface that is up, else the first one found.
pub fn default_wireless_interface() -> Option<String> {
    let ifaces = wireless_interfaces().ok()?;
    pick_interface(&ifaces)
}

fn pick_interface(ifaces: &[InterfaceInfo]) -> Option<String> {
    ifaces
        .iter()
        .find(|i| i.is_up())
        .or_else(|| ifaces.first())
        .map(|i| i.name.clone())
}
