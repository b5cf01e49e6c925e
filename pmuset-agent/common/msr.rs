use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use nix::fcntl::{flock, FlockArg};
use pmuset_raw::{MsrError, MsrFile};

use crate::config::Topology;

/// Failure to reach a core's registers
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Core {core} is not an online CPU ({available} cores available)")]
    CoreOutOfRange { core: u32, available: usize },

    #[error("MSR interface for core {core} is unavailable (is the msr module loaded?): {source}")]
    InterfaceUnavailable { core: u32, source: io::Error },

    #[error("Permission denied accessing MSRs of core {core} (must run as root): {source}")]
    PermissionDenied { core: u32, source: io::Error },

    #[error("MSR 0x{msr:X} access failed on core {core}: {source}")]
    Io { core: u32, msr: u64, source: io::Error },
}

impl AccessError {
    /// Sort a raw device error into the interface/privilege/IO buckets
    pub fn classify(core: u32, msr: u64, err: MsrError) -> Self {
        let source = err.into_io_error();
        match source.raw_os_error() {
            Some(libc::ENOENT | libc::ENXIO | libc::ENODEV) => {
                AccessError::InterfaceUnavailable { core, source }
            }
            Some(libc::EACCES | libc::EPERM) => AccessError::PermissionDenied { core, source },
            _ => match source.kind() {
                io::ErrorKind::NotFound => AccessError::InterfaceUnavailable { core, source },
                io::ErrorKind::PermissionDenied => AccessError::PermissionDenied { core, source },
                _ => AccessError::Io { core, msr, source },
            },
        }
    }

    pub fn core(&self) -> u32 {
        match self {
            AccessError::CoreOutOfRange { core, .. }
            | AccessError::InterfaceUnavailable { core, .. }
            | AccessError::PermissionDenied { core, .. }
            | AccessError::Io { core, .. } => *core,
        }
    }

    /// Driver missing or privilege too low, as opposed to a per-register fault
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            AccessError::InterfaceUnavailable { .. } | AccessError::PermissionDenied { .. }
        )
    }
}

/// One completed read-modify-write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Update {
    pub core: u32,
    pub msr: u64,
    pub before: u64,
    pub after: u64,
}

impl Update {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    /// Bits that differ between the old and new value
    pub fn flipped(&self) -> u64 {
        self.before ^ self.after
    }
}

/// Per-core register access
///
/// Every call reaches the register; implementations never cache values.
pub trait MsrAccess {
    fn read(&self, core: u32, msr: u64) -> Result<u64, AccessError>;

    fn write(&self, core: u32, msr: u64, value: u64) -> Result<(), AccessError>;

    /// Read `msr`, apply `update` to the current value and write the result back.
    ///
    /// The write is skipped when `update` leaves the value unchanged.
    fn modify(
        &self,
        core: u32,
        msr: u64,
        update: &dyn Fn(u64) -> u64,
    ) -> Result<Update, AccessError> {
        let before = self.read(core, msr)?;
        let after = update(before);
        if after != before {
            self.write(core, msr, after)?;
        }
        Ok(Update {
            core,
            msr,
            before,
            after,
        })
    }
}

/// Advisory exclusive lock on an MSR device node, released on drop
struct DeviceLock(RawFd);

impl DeviceLock {
    fn acquire(file: &impl AsRawFd) -> nix::Result<Self> {
        let fd = file.as_raw_fd();
        flock(fd, FlockArg::LockExclusive)?;
        Ok(Self(fd))
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        let _ = flock(self.0, FlockArg::Unlock);
    }
}

struct MsrHandle {
    file: Mutex<MsrFile>,
}

/// `/dev/cpu/<N>/msr` backed register access
///
/// Device nodes are opened on first use and kept for the lifetime of the
/// value. Cores outside the topology are rejected before any open.
pub struct MsrDevice {
    root: PathBuf,
    cores: Vec<u32>,
    handles: RwLock<HashMap<u32, Arc<MsrHandle>>>,
}

impl MsrDevice {
    pub fn new(root: impl Into<PathBuf>, topology: &Topology) -> Self {
        Self {
            root: root.into(),
            cores: topology.cores().to_vec(),
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn get_handle(&self, core: u32) -> Result<Arc<MsrHandle>, AccessError> {
        if !self.cores.contains(&core) {
            return Err(AccessError::CoreOutOfRange {
                core,
                available: self.cores.len(),
            });
        }

        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&core) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&core) {
            return Ok(Arc::clone(handle));
        }

        // address unknown at open time
        let file = MsrFile::open(&self.root, core).map_err(|e| AccessError::classify(core, 0, e))?;
        tracing::debug!("Opened MSR handle {} for core {}", file.as_raw_fd(), core);

        let handle = Arc::new(MsrHandle {
            file: Mutex::new(file),
        });
        handles.insert(core, Arc::clone(&handle));
        Ok(handle)
    }
}

impl MsrAccess for MsrDevice {
    fn read(&self, core: u32, msr: u64) -> Result<u64, AccessError> {
        let handle = self.get_handle(core)?;
        let value = handle
            .file
            .lock()
            .read(msr)
            .map_err(|e| AccessError::classify(core, msr, e))?;

        tracing::debug!("MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}", core, msr, value);
        Ok(value)
    }

    fn write(&self, core: u32, msr: u64, value: u64) -> Result<(), AccessError> {
        let handle = self.get_handle(core)?;
        handle
            .file
            .lock()
            .write(msr, value)
            .map_err(|e| AccessError::classify(core, msr, e))?;

        tracing::debug!("MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}", core, msr, value);
        Ok(())
    }

    /// Holds `flock(LOCK_EX)` on the core's device node across the read and
    /// the write, so concurrent pmuset processes cannot lose each other's
    /// updates. Other MSR writers are not covered.
    fn modify(
        &self,
        core: u32,
        msr: u64,
        update: &dyn Fn(u64) -> u64,
    ) -> Result<Update, AccessError> {
        let handle = self.get_handle(core)?;
        let mut file = handle.file.lock();
        let _lock = DeviceLock::acquire(&*file).map_err(|errno| AccessError::Io {
            core,
            msr,
            source: io::Error::from(errno),
        })?;

        let before = file
            .read(msr)
            .map_err(|e| AccessError::classify(core, msr, e))?;
        let after = update(before);
        if after != before {
            file.write(msr, after)
                .map_err(|e| AccessError::classify(core, msr, e))?;
        }

        tracing::debug!(
            "MSR modify: CPU {} MSR 0x{:08x} 0x{:016x} -> 0x{:016x}",
            core,
            msr,
            before,
            after
        );

        Ok(Update {
            core,
            msr,
            before,
            after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmuset_raw::device_path;

    fn fake_root(cores: &[u32]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for &core in cores {
            std::fs::create_dir_all(dir.path().join(core.to_string())).unwrap();
            let file = std::fs::File::create(device_path(dir.path(), core)).unwrap();
            file.set_len(0x1000).unwrap();
        }
        dir
    }

    #[test]
    fn test_device_read_write() {
        let root = fake_root(&[0, 1]);
        let device = MsrDevice::new(root.path(), &Topology::uniform(2, 8));

        device.write(1, 0x38F, 0x7_0000_00FF).unwrap();
        assert_eq!(device.read(1, 0x38F).unwrap(), 0x7_0000_00FF);
        assert_eq!(device.read(0, 0x38F).unwrap(), 0);
    }

    #[test]
    fn test_device_modify_preserves_other_bits() {
        let root = fake_root(&[0]);
        let device = MsrDevice::new(root.path(), &Topology::uniform(1, 8));
        device.write(0, 0x186, 0xDEAD_0000_0000_BEEF).unwrap();

        let update = device.modify(0, 0x186, &|v| v | 0x43_0000).unwrap();
        assert!(update.changed());
        assert_eq!(update.flipped(), 0x43_0000);
        assert_eq!(device.read(0, 0x186).unwrap(), 0xDEAD_0000_0043_BEEF);

        let unchanged = device.modify(0, 0x186, &|v| v).unwrap();
        assert!(!unchanged.changed());
    }

    #[test]
    fn test_concurrent_modify_loses_no_updates() {
        const WRITERS: u64 = 4;
        const ROUNDS: u64 = 500;

        let root = fake_root(&[0]);
        let topology = Topology::uniform(1, 8);

        // one device per writer, so each holds its own open file description
        std::thread::scope(|s| {
            for _ in 0..WRITERS {
                let device = MsrDevice::new(root.path(), &topology);
                s.spawn(move || {
                    for _ in 0..ROUNDS {
                        device.modify(0, 0x38F, &|v| v + 1).unwrap();
                    }
                });
            }
        });

        let device = MsrDevice::new(root.path(), &topology);
        assert_eq!(device.read(0, 0x38F).unwrap(), WRITERS * ROUNDS);
    }

    #[test]
    fn test_core_outside_topology() {
        let root = fake_root(&[0, 1, 2, 3]);
        let device = MsrDevice::new(root.path(), &Topology::uniform(2, 8));

        let err = device.read(3, 0x38F).unwrap_err();
        assert!(matches!(
            err,
            AccessError::CoreOutOfRange {
                core: 3,
                available: 2
            }
        ));
        assert!(!err.is_environment());
    }

    #[test]
    fn test_missing_device_is_interface_unavailable() {
        let root = fake_root(&[0]);
        let device = MsrDevice::new(root.path(), &Topology::uniform(2, 8));

        let err = device.read(1, 0x38F).unwrap_err();
        assert!(matches!(err, AccessError::InterfaceUnavailable { core: 1, .. }));
        assert!(err.is_environment());
    }

    #[test]
    fn test_classify_errno() {
        let denied = MsrError::OpenFailed {
            cpu: 0,
            path: PathBuf::from("/dev/cpu/0/msr"),
            source: io::Error::from_raw_os_error(libc::EACCES),
        };
        assert!(matches!(
            AccessError::classify(0, 0x38F, denied),
            AccessError::PermissionDenied { core: 0, .. }
        ));

        let eio = MsrError::ReadFailed {
            cpu: 2,
            msr: 0x18D,
            source: io::Error::from_raw_os_error(libc::EIO),
        };
        let err = AccessError::classify(2, 0x18D, eio);
        assert!(matches!(err, AccessError::Io { core: 2, msr: 0x18D, .. }));
        assert_eq!(err.core(), 2);
    }
}
