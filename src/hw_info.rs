//! Hardware inventory consulted by the memory-pressure policy

use crate::accel::CpuFeatures;
use serde::Serialize;
use std::path::Path;
use sysinfo::{DiskKind, Disks, System};
use tracing::debug;

/// Filesystems treated as shared between hosts
const SHARED_FILESYSTEMS: &[&str] = &["nfs", "nfs4", "cifs", "smbfs", "fuse.sshfs", "9p"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub size_bytes: u64,
    /// Spinning disk
    pub slow: bool,
    /// Network filesystem
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Memory {
    pub size_bytes: u64,
}

/// Disk, memory and CPU of the local machine
///
/// `Default` is the all-zero inventory used when nothing was sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HwInfo {
    pub disk: Disk,
    pub memory: Memory,
    pub cpu: CpuFeatures,
}

impl HwInfo {
    pub fn new(disk: Disk, memory: Memory, cpu: CpuFeatures) -> Self {
        Self { disk, memory, cpu }
    }

    /// Sample the machine, describing the disk that holds the working
    /// directory
    pub fn sample() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| "/".into());
        Self::sample_for(&cwd)
    }

    /// Sample the machine, describing the disk that holds `path`
    pub fn sample_for(path: &Path) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let info = Self {
            disk: disk_for(path),
            memory: Memory {
                size_bytes: sys.total_memory(),
            },
            cpu: CpuFeatures::detect(),
        };
        debug!(?info, "Sampled hardware");
        info
    }
}

/// Disk with the longest mount point that prefixes `path`
fn disk_for(path: &Path) -> Disk {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| {
            let fs = d.file_system().to_string_lossy().to_lowercase();
            Disk {
                size_bytes: d.total_space(),
                slow: d.kind() == DiskKind::HDD,
                shared: SHARED_FILESYSTEMS.contains(&fs.as_str()),
            }
        })
        .unwrap_or_default()
}
