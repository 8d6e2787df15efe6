//! Resource probes.
//!
//! A probe reads the current process and host resource state. Each metric
//! is read independently: a failed reading degrades that one field to
//! `None` (logged at warn) instead of aborting the whole observation.

use std::path::{Path, PathBuf};

use sysinfo::{
    Disks, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use tracing::warn;

use crate::Error;

/// One round of resource readings.
///
/// A `None` field means the metric could not be read this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceReadings {
    /// Resident memory of this process.
    pub heap_used_bytes: Option<u64>,
    /// Non-resident portion of this process's virtual address space.
    pub heap_free_bytes: Option<u64>,
    /// Host used memory.
    pub memory_used_bytes: Option<u64>,
    /// Host available memory.
    pub memory_free_bytes: Option<u64>,
    /// Recursive size of the configured scratch directory.
    pub temp_used_bytes: Option<u64>,
    /// Available space on the disk holding the scratch directory.
    pub temp_free_bytes: Option<u64>,
}

impl ResourceReadings {
    /// True when not a single metric could be read.
    pub fn is_empty(&self) -> bool {
        self.heap_used_bytes.is_none()
            && self.heap_free_bytes.is_none()
            && self.memory_used_bytes.is_none()
            && self.memory_free_bytes.is_none()
            && self.temp_used_bytes.is_none()
            && self.temp_free_bytes.is_none()
    }
}

/// Capability interface over runtime/OS introspection.
///
/// The sampler task owns its probe exclusively, so implementations are free
/// to keep mutable OS handles without locking.
pub trait ResourceProbe: Send {
    fn read(&mut self) -> ResourceReadings;
}

/// Probe backed by `sysinfo` plus a recursive scratch-directory walk.
pub struct SysinfoProbe {
    system: System,
    disks: Disks,
    pid: Option<Pid>,
    temp_dir: PathBuf,
}

impl SysinfoProbe {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                warn!(
                    error = %Error::sampling("heap", reason),
                    "Cannot resolve current pid; process memory metrics disabled"
                );
                None
            }
        };

        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing()
                    .with_memory(MemoryRefreshKind::everything())
                    .with_processes(ProcessRefreshKind::nothing().with_memory()),
            ),
            disks: Disks::new_with_refreshed_list(),
            pid,
            temp_dir: temp_dir.into(),
        }
    }

    /// The scratch directory this probe measures.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn process_memory(&mut self) -> (Option<u64>, Option<u64>) {
        let Some(pid) = self.pid else {
            return (None, None);
        };

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match self.system.process(pid) {
            Some(process) => {
                let resident = process.memory();
                let non_resident = process.virtual_memory().saturating_sub(resident);
                (Some(resident), Some(non_resident))
            }
            None => {
                warn!(
                    error = %Error::sampling("heap", "own process missing from process table"),
                    "Process memory unreadable this tick"
                );
                (None, None)
            }
        }
    }

    fn host_memory(&mut self) -> (Option<u64>, Option<u64>) {
        self.system.refresh_memory();

        if self.system.total_memory() == 0 {
            warn!(
                error = %Error::sampling("memory", "total memory reported as zero"),
                "Host memory unreadable this tick"
            );
            return (None, None);
        }

        (
            Some(self.system.used_memory()),
            Some(self.system.available_memory()),
        )
    }

    fn temp_usage(&mut self) -> (Option<u64>, Option<u64>) {
        let used = match dir_size_bytes(&self.temp_dir) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(
                    error = %Error::sampling("temp_used", err.to_string()),
                    path = %self.temp_dir.display(),
                    "Scratch directory unreadable this tick"
                );
                None
            }
        };

        self.disks.refresh(true);
        let free = self.available_space_for_path(&self.temp_dir);
        if free.is_none() {
            warn!(
                error = %Error::sampling("temp_free", "no disk matches the scratch directory"),
                path = %self.temp_dir.display(),
                "Scratch disk free space unreadable this tick"
            );
        }

        (used, free)
    }

    /// Available space on the disk with the longest mount point that is a
    /// prefix of `path` (most specific mount wins).
    fn available_space_for_path(&self, path: &Path) -> Option<u64> {
        let path_str = path.to_string_lossy();
        let mut best_match: Option<(&sysinfo::Disk, usize)> = None;

        for disk in self.disks.list() {
            let mount_point = disk.mount_point().to_string_lossy();
            if path_str.starts_with(mount_point.as_ref()) {
                let mount_len = mount_point.len();
                if best_match.is_none_or(|(_, len)| mount_len > len) {
                    best_match = Some((disk, mount_len));
                }
            }
        }

        best_match.map(|(disk, _)| disk.available_space())
    }
}

impl ResourceProbe for SysinfoProbe {
    fn read(&mut self) -> ResourceReadings {
        let (heap_used, heap_free) = self.process_memory();
        let (memory_used, memory_free) = self.host_memory();
        let (temp_used, temp_free) = self.temp_usage();

        ResourceReadings {
            heap_used_bytes: heap_used,
            heap_free_bytes: heap_free,
            memory_used_bytes: memory_used,
            memory_free_bytes: memory_free,
            temp_used_bytes: temp_used,
            temp_free_bytes: temp_free,
        }
    }
}

/// Recursive size of all regular files under `path`.
///
/// Symlinks are not followed. Entries that disappear mid-walk are skipped
/// rather than failing the whole measurement.
fn dir_size_bytes(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![std::fs::read_dir(path)?];

    while let Some(entries) = pending.pop() {
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if let Ok(nested) = std::fs::read_dir(entry.path()) {
                    pending.push(nested);
                }
            } else if file_type.is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total = total.saturating_add(metadata.len());
                }
            }
        }
    }

    Ok(total)
}
